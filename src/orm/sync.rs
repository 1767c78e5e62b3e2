use tracing::debug;

use crate::core::error::Result;
use crate::core::types::{value_to_key, Row, RowKey, Value};
use crate::query::context::Ctx;
use crate::schema::table::{OrmEdge, TableSchema};
use crate::writer::row_writer::{write_row, WriteFlags};

/// Keep ORM back-references symmetric after a write: diff the relation
/// column, remove this row's pk from dropped targets and add it to new
/// ones. The updates themselves are writes flagged to skip ORM fan-out,
/// which is what stops the recursion.
pub fn sync_on_write(
    ctx: &Ctx,
    schema: &TableSchema,
    old: Option<&Row>,
    new: &Row,
    pk: &RowKey,
    depth: usize,
) -> Result<()> {
    for edge in &schema.orm_edges {
        let old_ids = relation_ids(old.and_then(|r| r.get(&edge.this_column)), edge.this_many);
        let new_ids = relation_ids(new.get(&edge.this_column), edge.this_many);

        let removed: Vec<&Value> = old_ids.iter().filter(|v| !new_ids.contains(v)).collect();
        let added: Vec<&Value> = new_ids.iter().filter(|v| !old_ids.contains(v)).collect();
        if removed.is_empty() && added.is_empty() {
            continue;
        }
        debug!(
            table = %schema.name,
            column = %edge.this_column,
            added = added.len(),
            removed = removed.len(),
            "orm back-reference sync"
        );

        for id in removed {
            update_back_reference(ctx, edge, id, pk, false, depth)?;
        }
        for id in added {
            update_back_reference(ctx, edge, id, pk, true, depth)?;
        }
    }
    Ok(())
}

/// On delete every referenced row loses its back-reference to `pk`.
pub fn sync_on_delete(
    ctx: &Ctx,
    schema: &TableSchema,
    old: &Row,
    pk: &RowKey,
    depth: usize,
) -> Result<()> {
    for edge in &schema.orm_edges {
        for id in relation_ids(old.get(&edge.this_column), edge.this_many) {
            update_back_reference(ctx, edge, &id, pk, false, depth)?;
        }
    }
    Ok(())
}

fn relation_ids(value: Option<&Value>, many: bool) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) if many => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) if !many => vec![single.clone()],
        _ => Vec::new(),
    }
}

/// Point one related row's `from_column` at `pk` (or away from it).
/// Missing related rows are skipped, not created.
fn update_back_reference(
    ctx: &Ctx,
    edge: &OrmEdge,
    id: &Value,
    pk: &RowKey,
    add: bool,
    depth: usize,
) -> Result<()> {
    let related_schema = ctx.schema.get(&edge.from_table)?;
    let Some(related_key) = value_to_key(id) else {
        return Ok(());
    };
    let Some(related_row) = ctx.adapter.read(&edge.from_table, &related_key)? else {
        return Ok(());
    };

    let back_ref = pk.to_value();
    let mut updated = related_row.clone();
    if edge.from_many {
        let mut items = match updated.get(&edge.from_column) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        if add {
            if !items.contains(&back_ref) {
                items.push(back_ref);
                items.sort_by(|a, b| a.cmp_order(b));
            }
        } else {
            items.retain(|v| v != &back_ref);
        }
        updated.insert(edge.from_column.clone(), Value::Array(items));
    } else if add {
        updated.insert(edge.from_column.clone(), back_ref);
    } else if updated.get(&edge.from_column) == Some(&back_ref) {
        updated.insert(edge.from_column.clone(), Value::Null);
    }

    if updated == related_row {
        return Ok(());
    }
    write_row(
        ctx,
        related_schema,
        updated,
        &WriteFlags {
            skip_orm: true,
            rebuild_search: false,
            depth,
        },
    )?;
    Ok(())
}
