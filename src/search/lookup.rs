use std::collections::{BTreeMap, HashMap};

use crate::analysis::tokenizer::{tokenize, TokenizerHook};
use crate::core::error::{Error, Result};
use crate::core::types::{RowKey, Value};
use crate::index::search_index::read_word_record;
use crate::schema::table::TableSchema;
use crate::search::fuzzy::{levenshtein_distance, FuzzyMatcher};
use crate::search::scorer::{score, sequence_match, ColumnHits, WordHit};
use crate::storage::adapter::{search_fuzzy_table, search_table, StorageAdapter};

/// How the comparator of a `search(...)` leaf filters scored rows.
/// `=` is exact mode; `>X` / `<X` run fuzzy and keep by normalized weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    Exact,
    Above(f64),
    Below(f64),
}

/// A row matched by a search leaf, scored and ready to adorn.
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub pk: RowKey,
    /// Normalized to the best row: 1.0 is the top hit.
    pub weight: f64,
    /// `{column: [{word, loc: [positions]}]}` diagnostic payload.
    pub locations: Value,
}

/// Execute one `search(columns) op term` leaf against the search indexes.
pub fn search_rows(
    adapter: &dyn StorageAdapter,
    schema: &TableSchema,
    hook: Option<&TokenizerHook>,
    max_edits: u8,
    columns: &[String],
    term: &str,
    threshold: Threshold,
) -> Result<Vec<SearchMatch>> {
    let fuzzy = threshold != Threshold::Exact;
    let mut per_pk: HashMap<RowKey, Vec<ColumnHits>> = HashMap::new();
    let mut query_lens: BTreeMap<String, usize> = BTreeMap::new();

    for column in columns {
        let search = schema.search_columns.get(column).ok_or_else(|| {
            Error::schema(format!(
                "column '{}' of table '{}' is not search-indexed",
                column, schema.name
            ))
        })?;
        let qtokens = tokenize(search.mode, column, term, hook);
        query_lens.insert(column.clone(), qtokens.len());
        if qtokens.is_empty() {
            continue;
        }

        // (pk, word, term_index) -> (distance, positions, doc_len)
        let mut hits: HashMap<(RowKey, String, usize), (usize, Vec<u32>, usize)> = HashMap::new();

        let exact_tbl = search_table(&schema.name, column);
        for (term_index, token) in qtokens.iter().enumerate() {
            for hit in read_word_record(adapter, &exact_tbl, &token.normalized)? {
                hits.insert(
                    (hit.pk.clone(), token.normalized.clone(), term_index),
                    (0, hit.positions, hit.doc_len),
                );
            }
        }

        if fuzzy {
            let fuzzy_tbl = search_fuzzy_table(&schema.name, column);
            let words = adapter.index_keys(&fuzzy_tbl)?;
            for (term_index, token) in qtokens.iter().enumerate() {
                let matcher = FuzzyMatcher::new(&token.original, max_edits);
                for key in &words {
                    let RowKey::Str(word) = key else { continue };
                    if matcher.matches(word).is_none() {
                        continue;
                    }
                    // the DFA gates candidates; scoring uses the plain
                    // edit distance
                    let distance = levenshtein_distance(&token.original, word);
                    for hit in read_word_record(adapter, &fuzzy_tbl, word)? {
                        let entry = hits
                            .entry((hit.pk.clone(), word.clone(), term_index))
                            .or_insert((distance, hit.positions.clone(), hit.doc_len));
                        // keep the closest variant of a doubly-matched word
                        if distance < entry.0 {
                            *entry = (distance, hit.positions, hit.doc_len);
                        }
                    }
                }
            }
        }

        for ((pk, word, term_index), (distance, positions, doc_len)) in hits {
            let columns_of_pk = per_pk.entry(pk).or_default();
            let idx = match columns_of_pk.iter().position(|c| &c.column == column) {
                Some(existing) => existing,
                None => {
                    columns_of_pk.push(ColumnHits {
                        column: column.clone(),
                        boost: search.boost,
                        doc_len,
                        words: Vec::new(),
                    });
                    columns_of_pk.len() - 1
                }
            };
            let col_hits = &mut columns_of_pk[idx];
            col_hits.doc_len = col_hits.doc_len.max(doc_len);
            col_hits.words.push(WordHit {
                word,
                term_index,
                distance,
                positions,
            });
        }
    }

    // exact multi-term mode: the query sequence must appear contiguously
    if !fuzzy {
        per_pk.retain(|_, columns_of_pk| {
            columns_of_pk.iter().any(|c| {
                let qlen = query_lens.get(&c.column).copied().unwrap_or(1);
                sequence_match(std::slice::from_ref(c), qlen)
            })
        });
    }

    let mut scored: Vec<(RowKey, f64, Vec<ColumnHits>)> = per_pk
        .into_iter()
        .map(|(pk, hits)| {
            let s = score(&hits, fuzzy);
            (pk, s, hits)
        })
        .collect();

    let max = scored.iter().map(|(_, s, _)| *s).fold(0.0_f64, f64::max);
    if max > 0.0 {
        for (_, s, _) in &mut scored {
            *s /= max;
        }
    }

    scored.retain(|(_, weight, _)| match threshold {
        Threshold::Exact => true,
        Threshold::Above(limit) => *weight > limit,
        Threshold::Below(limit) => *weight < limit.abs(),
    });

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    Ok(scored
        .into_iter()
        .map(|(pk, weight, hits)| SearchMatch {
            pk,
            weight,
            locations: locations_value(&hits),
        })
        .collect())
}

fn locations_value(hits: &[ColumnHits]) -> Value {
    let mut by_column = BTreeMap::new();
    for column in hits {
        let entries: Vec<Value> = column
            .words
            .iter()
            .map(|w| {
                let mut entry = BTreeMap::new();
                entry.insert("word".to_string(), Value::String(w.word.clone()));
                entry.insert(
                    "loc".to_string(),
                    Value::Array(
                        w.positions
                            .iter()
                            .map(|p| Value::Number(*p as f64))
                            .collect(),
                    ),
                );
                Value::Object(entry)
            })
            .collect();
        by_column.insert(column.column.clone(), Value::Array(entries));
    }
    Value::Object(by_column)
}

/// Parse a `search(col1, col2)` WHERE path into its column list.
pub fn parse_search_path(path: &str) -> Option<Vec<String>> {
    let rest = path.strip_prefix("search(")?;
    let inner = rest.strip_suffix(')')?;
    Some(
        inner
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_path_parsing() {
        assert_eq!(
            parse_search_path("search(body)"),
            Some(vec!["body".to_string()])
        );
        assert_eq!(
            parse_search_path("search(title, body)"),
            Some(vec!["title".to_string(), "body".to_string()])
        );
        assert_eq!(parse_search_path("body"), None);
    }
}
