use fst::{IntoStreamer, Map, MapBuilder, Streamer};
use std::collections::BTreeMap;

use crate::core::error::Result;
use crate::core::types::RowKey;

/// FST-backed prefix index over a trie column's values. Mutations mark the
/// map dirty; the FST is rebuilt from the term set on the next lookup.
pub struct PrefixIndex {
    terms: BTreeMap<String, Vec<RowKey>>,
    fst: Map<Vec<u8>>,
    dirty: bool,
}

impl PrefixIndex {
    pub fn new() -> Self {
        PrefixIndex {
            terms: BTreeMap::new(),
            fst: Map::default(),
            dirty: false,
        }
    }

    pub fn insert(&mut self, value: &str, pk: RowKey) {
        let pks = self.terms.entry(value.to_string()).or_default();
        if !pks.contains(&pk) {
            pks.push(pk);
        }
        self.dirty = true;
    }

    pub fn remove(&mut self, value: &str, pk: &RowKey) {
        if let Some(pks) = self.terms.get_mut(value) {
            pks.retain(|p| p != pk);
            if pks.is_empty() {
                self.terms.remove(value);
            }
            self.dirty = true;
        }
    }

    pub fn clear(&mut self) {
        self.terms.clear();
        self.fst = Map::default();
        self.dirty = false;
    }

    /// All pks whose value starts with `prefix`, in value order.
    pub fn search_prefix(&mut self, prefix: &str) -> Result<Vec<RowKey>> {
        self.rebuild_if_dirty()?;

        let mut out = Vec::new();
        let prefix_bytes = prefix.as_bytes();
        let mut stream = self.fst.range().ge(prefix_bytes).into_stream();

        while let Some((term_bytes, _)) = stream.next() {
            if !term_bytes.starts_with(prefix_bytes) {
                break;
            }
            if let Ok(term) = std::str::from_utf8(term_bytes) {
                if let Some(pks) = self.terms.get(term) {
                    for pk in pks {
                        if !out.contains(pk) {
                            out.push(pk.clone());
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn rebuild_if_dirty(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut builder = MapBuilder::memory();
        // BTreeMap iteration is already the sorted order the FST wants
        for (ordinal, term) in self.terms.keys().enumerate() {
            builder.insert(term.as_bytes(), ordinal as u64)?;
        }
        self.fst = builder.into_map();
        self.dirty = false;
        Ok(())
    }
}

impl Default for PrefixIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_lookup_after_inserts() {
        let mut index = PrefixIndex::new();
        index.insert("billy", RowKey::Int(1));
        index.insert("bill", RowKey::Int(2));
        index.insert("jeb", RowKey::Int(3));

        assert_eq!(
            index.search_prefix("bil").unwrap(),
            vec![RowKey::Int(2), RowKey::Int(1)]
        );
        assert_eq!(index.search_prefix("x").unwrap(), Vec::<RowKey>::new());
    }

    #[test]
    fn remove_drops_empty_terms() {
        let mut index = PrefixIndex::new();
        index.insert("bill", RowKey::Int(1));
        index.remove("bill", &RowKey::Int(1));
        assert_eq!(index.search_prefix("bill").unwrap(), Vec::<RowKey>::new());
    }
}
