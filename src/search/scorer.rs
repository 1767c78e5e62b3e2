use std::collections::BTreeSet;

/// One matched index word within a column, tied back to the query token
/// that matched it.
#[derive(Debug, Clone)]
pub struct WordHit {
    /// The index word that matched.
    pub word: String,
    /// Index of the query token that produced the match.
    pub term_index: usize,
    /// Edit distance between query token and `word` (0 for exact).
    pub distance: usize,
    pub positions: Vec<u32>,
}

/// All hits of one row inside one searched column.
#[derive(Debug, Clone)]
pub struct ColumnHits {
    pub column: String,
    pub boost: f64,
    pub doc_len: usize,
    pub words: Vec<WordHit>,
}

/// Relevance of one row.
///
/// Per matched column: sum of hit position indices over the token count,
/// plus the column boost. Plus one per distinct matched query token. In
/// fuzzy mode, co-locating hit pairs add `10/(d*10)` for position distance
/// `d`, and each word adds `10/(5*lev)` for its edit distance (flat 4 for
/// an exact hit). Scores are normalized to the maximum by the caller.
pub fn score(hits: &[ColumnHits], fuzzy: bool) -> f64 {
    let mut total = 0.0;
    let mut matched_terms: BTreeSet<usize> = BTreeSet::new();

    for column in hits {
        if column.words.is_empty() {
            continue;
        }
        let position_sum: u32 = column
            .words
            .iter()
            .flat_map(|w| w.positions.iter())
            .sum();
        if column.doc_len > 0 {
            total += position_sum as f64 / column.doc_len as f64;
        }
        total += column.boost;

        for word in &column.words {
            matched_terms.insert(word.term_index);
        }

        if fuzzy {
            for word in &column.words {
                total += if word.distance == 0 {
                    4.0
                } else {
                    10.0 / (5.0 * word.distance as f64)
                };
            }
            total += colocation_bonus(&column.words);
        }
    }

    total + matched_terms.len() as f64
}

/// Whether the query's token sequence appears contiguously, in order, in
/// some column of the row. Exact multi-term searches discard rows that
/// fail this.
pub fn sequence_match(hits: &[ColumnHits], query_len: usize) -> bool {
    if query_len <= 1 {
        return true;
    }
    hits.iter().any(|column| {
        // positions per query token index
        let mut per_term: Vec<Vec<u32>> = vec![Vec::new(); query_len];
        for word in &column.words {
            if word.term_index < query_len {
                per_term[word.term_index].extend(&word.positions);
            }
        }
        if per_term.iter().any(|p| p.is_empty()) {
            return false;
        }
        per_term[0].iter().any(|&start| {
            (1..query_len).all(|k| per_term[k].contains(&(start + k as u32)))
        })
    })
}

fn colocation_bonus(words: &[WordHit]) -> f64 {
    let mut bonus = 0.0;
    for (i, a) in words.iter().enumerate() {
        for b in words.iter().skip(i + 1) {
            if a.term_index == b.term_index {
                continue;
            }
            let mut best: Option<u32> = None;
            for &pa in &a.positions {
                for &pb in &b.positions {
                    let d = pa.abs_diff(pb);
                    best = Some(best.map_or(d, |b| b.min(d)));
                }
            }
            if let Some(d) = best {
                bonus += if d == 0 { 1.0 } else { 10.0 / (d as f64 * 10.0) };
            }
        }
    }
    bonus
}
