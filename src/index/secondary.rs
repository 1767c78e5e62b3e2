use std::collections::BTreeMap;

use crate::core::error::Result;
use crate::core::types::{value_to_key, Row, RowKey, Value};
use crate::schema::table::TableSchema;
use crate::storage::adapter::{idx_table, RangeSpec, StorageAdapter};

// A secondary index lives in its own adapter table `_<T>_idx_<col>`, one
// record per distinct column value: { id: value, rows: [pk, ...] }.

pub fn read_pks(adapter: &dyn StorageAdapter, index_table: &str, key: &RowKey) -> Result<Vec<RowKey>> {
    match adapter.read(index_table, key)? {
        Some(record) => Ok(record_pks(&record)),
        None => Ok(Vec::new()),
    }
}

/// Union of the pk lists of every index record with `from <= value <= to`,
/// in key order.
pub fn range_pks(
    adapter: &dyn StorageAdapter,
    index_table: &str,
    from: &RowKey,
    to: &RowKey,
) -> Result<Vec<RowKey>> {
    let mut out = Vec::new();
    adapter.range_read(index_table, RangeSpec::Keys { from, to }, &mut |record, _| {
        for pk in record_pks(&record) {
            if !out.contains(&pk) {
                out.push(pk);
            }
        }
        Ok(())
    })?;
    Ok(out)
}

pub fn add_pk(
    adapter: &dyn StorageAdapter,
    index_table: &str,
    key: &RowKey,
    pk: &RowKey,
) -> Result<()> {
    let mut pks = read_pks(adapter, index_table, key)?;
    if !pks.contains(pk) {
        pks.push(pk.clone());
        pks.sort();
    }
    adapter.write(index_table, Some(key), record_from(key, &pks))?;
    Ok(())
}

/// Remove a pk from a record; an emptied record is deleted outright.
pub fn remove_pk(
    adapter: &dyn StorageAdapter,
    index_table: &str,
    key: &RowKey,
    pk: &RowKey,
) -> Result<()> {
    let mut pks = read_pks(adapter, index_table, key)?;
    let before = pks.len();
    pks.retain(|p| p != pk);
    if pks.len() == before {
        return Ok(());
    }
    if pks.is_empty() {
        adapter.delete(index_table, key)?;
    } else {
        adapter.write(index_table, Some(key), record_from(key, &pks))?;
    }
    Ok(())
}

/// Move `pk` between value records for every indexed column whose value
/// changed between `old` and `new`.
pub fn update_for_write(
    adapter: &dyn StorageAdapter,
    schema: &TableSchema,
    old: Option<&Row>,
    new: &Row,
    pk: &RowKey,
) -> Result<()> {
    for column in &schema.secondary_indexes {
        let old_value = old.and_then(|r| r.get(column));
        let new_value = new.get(column);
        if old_value == new_value {
            continue;
        }
        let table = idx_table(&schema.name, column);
        if let Some(key) = old_value.and_then(value_to_key) {
            remove_pk(adapter, &table, &key, pk)?;
        }
        if let Some(key) = new_value.and_then(value_to_key) {
            add_pk(adapter, &table, &key, pk)?;
        }
    }
    Ok(())
}

pub fn retract_for_delete(
    adapter: &dyn StorageAdapter,
    schema: &TableSchema,
    old: &Row,
    pk: &RowKey,
) -> Result<()> {
    for column in &schema.secondary_indexes {
        if let Some(key) = old.get(column).and_then(value_to_key) {
            remove_pk(adapter, &idx_table(&schema.name, column), &key, pk)?;
        }
    }
    Ok(())
}

fn record_pks(record: &Row) -> Vec<RowKey> {
    record
        .get("rows")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(value_to_key).collect())
        .unwrap_or_default()
}

fn record_from(key: &RowKey, pks: &[RowKey]) -> Row {
    let mut record: Row = BTreeMap::new();
    record.insert("id".to_string(), key.to_value());
    record.insert(
        "rows".to_string(),
        Value::Array(pks.iter().map(RowKey::to_value).collect()),
    );
    record
}
