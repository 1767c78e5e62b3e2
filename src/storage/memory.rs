use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{value_to_key, Row, RowKey, Value};
use crate::storage::adapter::{RangeSpec, StorageAdapter, TableShape};

/// Reference backend: rows in pk-ordered maps, nothing persisted. Useful on
/// its own for small data sets and as the backend the test suite runs on.
pub struct MemoryBackend {
    tables: RwLock<BTreeMap<String, TableStore>>,
}

struct TableStore {
    shape: TableShape,
    rows: BTreeMap<RowKey, Row>,
    auto_pk: i64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    fn missing(table: &str) -> Error {
        Error::new(ErrorKind::Adapter, format!("no such table '{}'", table))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageAdapter for MemoryBackend {
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn make_table(&self, name: &str, shape: TableShape) -> Result<()> {
        self.tables
            .write()
            .entry(name.to_string())
            .or_insert_with(|| TableStore {
                shape,
                rows: BTreeMap::new(),
                auto_pk: 0,
            });
        Ok(())
    }

    fn write(&self, table: &str, pk: Option<&RowKey>, mut row: Row) -> Result<Row> {
        let mut tables = self.tables.write();
        let store = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;

        let key = match pk {
            Some(k) => k.clone(),
            None => match value_to_key(
                row.get(&store.shape.primary_key).unwrap_or(&Value::Null),
            ) {
                Some(k) => k,
                None if store.shape.pk_numeric => {
                    store.auto_pk += 1;
                    RowKey::Int(store.auto_pk)
                }
                None => RowKey::Str(Uuid::new_v4().to_string()),
            },
        };
        if let RowKey::Int(i) = key {
            store.auto_pk = store.auto_pk.max(i);
        }

        row.insert(store.shape.primary_key.clone(), key.to_value());
        store.rows.insert(key, row.clone());
        Ok(row)
    }

    fn read(&self, table: &str, pk: &RowKey) -> Result<Option<Row>> {
        let tables = self.tables.read();
        let store = tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(store.rows.get(pk).cloned())
    }

    fn batch_read(&self, table: &str, pks: &[RowKey]) -> Result<Vec<Row>> {
        let tables = self.tables.read();
        let store = tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(pks
            .iter()
            .filter_map(|pk| store.rows.get(pk).cloned())
            .collect())
    }

    fn range_read(
        &self,
        table: &str,
        range: RangeSpec,
        per_row: &mut dyn FnMut(Row, usize) -> Result<()>,
    ) -> Result<()> {
        let tables = self.tables.read();
        let store = tables.get(table).ok_or_else(|| Self::missing(table))?;

        match range {
            RangeSpec::Offsets { from, to } => {
                for (idx, row) in store
                    .rows
                    .values()
                    .enumerate()
                    .skip(from)
                    .take(to.saturating_sub(from))
                {
                    per_row(row.clone(), idx)?;
                }
            }
            RangeSpec::Keys { from, to } => {
                for (idx, (_, row)) in store.rows.range(from.clone()..=to.clone()).enumerate() {
                    per_row(row.clone(), idx)?;
                }
            }
        }
        Ok(())
    }

    fn delete(&self, table: &str, pk: &RowKey) -> Result<()> {
        let mut tables = self.tables.write();
        let store = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;
        store.rows.remove(pk);
        Ok(())
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        let mut tables = self.tables.write();
        if let Some(store) = tables.get_mut(table) {
            store.rows.clear();
            store.auto_pk = 0;
        }
        Ok(())
    }

    fn index_keys(&self, table: &str) -> Result<Vec<RowKey>> {
        let tables = self.tables.read();
        let store = tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(store.rows.keys().cloned().collect())
    }

    fn row_count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read();
        let store = tables.get(table).ok_or_else(|| Self::missing(table))?;
        Ok(store.rows.len())
    }

    fn destroy(&self) -> Result<()> {
        self.tables.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> TableShape {
        TableShape {
            primary_key: "id".to_string(),
            pk_numeric: true,
        }
    }

    #[test]
    fn assigns_monotone_numeric_pks() {
        let backend = MemoryBackend::new();
        backend.make_table("t", shape()).unwrap();

        let a = backend.write("t", None, Row::new()).unwrap();
        let b = backend.write("t", None, Row::new()).unwrap();
        assert_eq!(a.get("id"), Some(&Value::Number(1.0)));
        assert_eq!(b.get("id"), Some(&Value::Number(2.0)));

        // explicit keys advance the counter past themselves
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Number(10.0));
        backend.write("t", None, row).unwrap();
        let c = backend.write("t", None, Row::new()).unwrap();
        assert_eq!(c.get("id"), Some(&Value::Number(11.0)));
    }

    #[test]
    fn assigns_uuid_for_string_pk_tables() {
        let backend = MemoryBackend::new();
        backend
            .make_table(
                "t",
                TableShape {
                    primary_key: "id".to_string(),
                    pk_numeric: false,
                },
            )
            .unwrap();
        let row = backend.write("t", None, Row::new()).unwrap();
        let id = row.get("id").and_then(|v| v.as_str().map(str::to_string));
        assert_eq!(id.map(|s| s.len()), Some(36));
    }

    #[test]
    fn range_read_by_offsets_and_keys() {
        let backend = MemoryBackend::new();
        backend.make_table("t", shape()).unwrap();
        for i in 1..=5 {
            let mut row = Row::new();
            row.insert("id".to_string(), Value::Number(i as f64));
            backend.write("t", None, row).unwrap();
        }

        let mut seen = Vec::new();
        backend
            .range_read("t", RangeSpec::Offsets { from: 1, to: 3 }, &mut |row, _| {
                seen.push(row.get("id").cloned().unwrap());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![Value::Number(2.0), Value::Number(3.0)]);

        let mut seen = Vec::new();
        backend
            .range_read(
                "t",
                RangeSpec::Keys {
                    from: &RowKey::Int(2),
                    to: &RowKey::Int(4),
                },
                &mut |row, _| {
                    seen.push(row.get("id").cloned().unwrap());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(
            seen,
            vec![Value::Number(2.0), Value::Number(3.0), Value::Number(4.0)]
        );
    }
}
