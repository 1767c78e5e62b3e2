use std::collections::BTreeMap;

use crate::analysis::token::Token;
use crate::analysis::tokenizer::{tokenize, TokenizerHook};
use crate::core::error::Result;
use crate::core::types::{value_to_key, Row, RowKey, Value};
use crate::schema::table::TableSchema;
use crate::storage::adapter::{search_fuzzy_table, search_table, search_tokens_table, StorageAdapter};

/// One row's hits for a word, as stored in a search index record.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub pk: RowKey,
    pub doc_len: usize,
    pub positions: Vec<u32>,
}

/// Maintain the search indexes of every search-configured column for a
/// write of `new_row`.
///
/// Per column: hash the content, short-circuit when unchanged (unless
/// `rebuild` forces re-indexing), tokenize, diff the stored token record
/// against the new tokens and push the difference into the exact and fuzzy
/// word records, then persist the new token record. The fuzzy index carries
/// both the normalized word and its original spelling.
pub fn update_for_write(
    adapter: &dyn StorageAdapter,
    schema: &TableSchema,
    hook: Option<&TokenizerHook>,
    new_row: &Row,
    pk: &RowKey,
    rebuild: bool,
) -> Result<()> {
    for (column, search) in &schema.search_columns {
        let value = match new_row.get(column) {
            Some(v) if !v.is_null() => v,
            _ => continue,
        };
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.stringify(),
        };
        let hash = crc32fast::hash(text.as_bytes());

        let tokens_tbl = search_tokens_table(&schema.name, column);
        let stored = read_token_record(adapter, &tokens_tbl, pk)?;
        if !rebuild {
            if let Some((stored_hash, _)) = &stored {
                if *stored_hash == hash {
                    continue;
                }
            }
        }

        let old_tokens = stored.map(|(_, t)| t).unwrap_or_default();
        let new_tokens = tokenize(search.mode, column, &text, hook);
        let doc_len = new_tokens.len();

        apply_token_diff(
            adapter,
            &search_table(&schema.name, column),
            pk,
            &word_positions(&old_tokens, false),
            &word_positions(&new_tokens, false),
            doc_len,
            rebuild,
        )?;
        apply_token_diff(
            adapter,
            &search_fuzzy_table(&schema.name, column),
            pk,
            &word_positions(&old_tokens, true),
            &word_positions(&new_tokens, true),
            doc_len,
            rebuild,
        )?;

        write_token_record(adapter, &tokens_tbl, pk, hash, &new_tokens)?;
    }
    Ok(())
}

/// Inverse of [`update_for_write`]: the stored token record is authoritative
/// for what must be retracted.
pub fn retract_for_delete(
    adapter: &dyn StorageAdapter,
    schema: &TableSchema,
    pk: &RowKey,
) -> Result<()> {
    for column in schema.search_columns.keys() {
        let tokens_tbl = search_tokens_table(&schema.name, column);
        let Some((_, tokens)) = read_token_record(adapter, &tokens_tbl, pk)? else {
            continue;
        };

        let empty = BTreeMap::new();
        apply_token_diff(
            adapter,
            &search_table(&schema.name, column),
            pk,
            &word_positions(&tokens, false),
            &empty,
            0,
            false,
        )?;
        apply_token_diff(
            adapter,
            &search_fuzzy_table(&schema.name, column),
            pk,
            &word_positions(&tokens, true),
            &empty,
            0,
            false,
        )?;
        adapter.delete(&tokens_tbl, pk)?;
    }
    Ok(())
}

/// Hits for one normalized word of a search index table.
pub fn read_word_record(
    adapter: &dyn StorageAdapter,
    index_table: &str,
    word: &str,
) -> Result<Vec<SearchHit>> {
    let key = RowKey::Str(word.to_string());
    match adapter.read(index_table, &key)? {
        Some(record) => Ok(record_hits(&record)),
        None => Ok(Vec::new()),
    }
}

// position sets per word; with_original folds the as-typed spelling in for
// the fuzzy variant
fn word_positions(tokens: &[Token], with_original: bool) -> BTreeMap<String, Vec<u32>> {
    let mut map: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for token in tokens {
        map.entry(token.normalized.clone())
            .or_default()
            .push(token.position);
        if with_original && token.original != token.normalized {
            map.entry(token.original.clone())
                .or_default()
                .push(token.position);
        }
    }
    map
}

fn apply_token_diff(
    adapter: &dyn StorageAdapter,
    index_table: &str,
    pk: &RowKey,
    old: &BTreeMap<String, Vec<u32>>,
    new: &BTreeMap<String, Vec<u32>>,
    doc_len: usize,
    force: bool,
) -> Result<()> {
    for word in old.keys() {
        if !new.contains_key(word) {
            set_hit(adapter, index_table, word, pk, None, doc_len)?;
        }
    }
    for (word, positions) in new {
        // `force` is the rebuild path: rewrite even unchanged words
        if force || old.get(word) != Some(positions) {
            set_hit(adapter, index_table, word, pk, Some(positions), doc_len)?;
        }
    }
    Ok(())
}

/// Replace (or remove, on `None`) a pk's entry in a word record. Records
/// with no remaining entries are deleted.
fn set_hit(
    adapter: &dyn StorageAdapter,
    index_table: &str,
    word: &str,
    pk: &RowKey,
    positions: Option<&[u32]>,
    doc_len: usize,
) -> Result<()> {
    let key = RowKey::Str(word.to_string());
    let mut hits = match adapter.read(index_table, &key)? {
        Some(record) => record_hits(&record),
        None => Vec::new(),
    };
    hits.retain(|h| h.pk != *pk);
    if let Some(positions) = positions {
        hits.push(SearchHit {
            pk: pk.clone(),
            doc_len,
            positions: positions.to_vec(),
        });
    }

    if hits.is_empty() {
        adapter.delete(index_table, &key)?;
    } else {
        let mut record: Row = BTreeMap::new();
        record.insert("id".to_string(), Value::String(word.to_string()));
        record.insert(
            "rows".to_string(),
            Value::Array(hits.iter().map(hit_to_value).collect()),
        );
        adapter.write(index_table, Some(&key), record)?;
    }
    Ok(())
}

fn read_token_record(
    adapter: &dyn StorageAdapter,
    tokens_table: &str,
    pk: &RowKey,
) -> Result<Option<(u32, Vec<Token>)>> {
    let Some(record) = adapter.read(tokens_table, pk)? else {
        return Ok(None);
    };
    let hash = record
        .get("hash")
        .and_then(Value::as_f64)
        .unwrap_or(0.0) as u32;
    let tokens = record
        .get("tokens")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let Value::Object(map) = item else { return None };
                    Some(Token::new(
                        map.get("o")?.as_str()?,
                        map.get("w")?.as_str()?,
                        map.get("i")?.as_f64()? as u32,
                    ))
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(Some((hash, tokens)))
}

fn write_token_record(
    adapter: &dyn StorageAdapter,
    tokens_table: &str,
    pk: &RowKey,
    hash: u32,
    tokens: &[Token],
) -> Result<()> {
    let mut record: Row = BTreeMap::new();
    record.insert("id".to_string(), pk.to_value());
    record.insert("hash".to_string(), Value::Number(hash as f64));
    record.insert(
        "tokens".to_string(),
        Value::Array(
            tokens
                .iter()
                .map(|t| {
                    let mut map = BTreeMap::new();
                    map.insert("w".to_string(), Value::String(t.normalized.clone()));
                    map.insert("o".to_string(), Value::String(t.original.clone()));
                    map.insert("i".to_string(), Value::Number(t.position as f64));
                    Value::Object(map)
                })
                .collect(),
        ),
    );
    adapter.write(tokens_table, Some(pk), record)?;
    Ok(())
}

fn record_hits(record: &Row) -> Vec<SearchHit> {
    record
        .get("rows")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let Value::Object(map) = item else { return None };
                    Some(SearchHit {
                        pk: value_to_key(map.get("pk")?)?,
                        doc_len: map.get("l")?.as_f64()? as usize,
                        positions: map
                            .get("i")?
                            .as_array()?
                            .iter()
                            .filter_map(|p| p.as_f64().map(|f| f as u32))
                            .collect(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn hit_to_value(hit: &SearchHit) -> Value {
    let mut map = BTreeMap::new();
    map.insert("pk".to_string(), hit.pk.to_value());
    map.insert("l".to_string(), Value::Number(hit.doc_len as f64));
    map.insert(
        "i".to_string(),
        Value::Array(
            hit.positions
                .iter()
                .map(|p| Value::Number(*p as f64))
                .collect(),
        ),
    );
    Value::Object(map)
}
