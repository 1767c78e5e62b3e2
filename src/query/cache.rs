use lru::LruCache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::types::Row;
use crate::query::descriptor::Query;

/// Stable hash of a query descriptor with transient fields cleared. `None`
/// when the query cannot be fingerprinted (a user-function WHERE).
pub fn fingerprint(query: &Query) -> Option<u32> {
    if query.where_fn.is_some() {
        return None;
    }
    let mut normalized = query.clone();
    normalized.query_id = None;
    let bytes = bincode::serialize(&normalized).ok()?;
    Some(crc32fast::hash(&bytes))
}

/// Per-table result cache. Every entry dies on the first write to its
/// table, so staleness windows cannot open.
pub struct QueryCache {
    tables: RwLock<HashMap<String, LruCache<u32, Arc<Vec<Row>>>>>,
    capacity: NonZeroUsize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl QueryCache {
    pub fn new(entries_per_table: usize) -> Self {
        QueryCache {
            tables: RwLock::new(HashMap::new()),
            capacity: NonZeroUsize::new(entries_per_table.max(1)).unwrap(),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, table: &str, fingerprint: u32) -> Option<Arc<Vec<Row>>> {
        let mut tables = self.tables.write();
        let found = tables
            .get_mut(table)
            .and_then(|cache| cache.get(&fingerprint).cloned());
        match found {
            Some(rows) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(rows)
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, table: &str, fingerprint: u32, rows: Arc<Vec<Row>>) {
        let mut tables = self.tables.write();
        tables
            .entry(table.to_string())
            .or_insert_with(|| LruCache::new(self.capacity))
            .put(fingerprint, rows);
    }

    /// Wholesale invalidation of one table's entries.
    pub fn invalidate(&self, table: &str) {
        self.tables.write().remove(table);
    }

    pub fn clear(&self) {
        self.tables.write().clear();
    }

    pub fn is_empty_for(&self, table: &str) -> bool {
        self.tables
            .read()
            .get(table)
            .map(|cache| cache.is_empty())
            .unwrap_or(true)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}
