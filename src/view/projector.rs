use tracing::{debug, warn};

use crate::core::error::Result;
use crate::core::types::{value_to_key, Row, Value};
use crate::index::secondary;
use crate::query::context::Ctx;
use crate::schema::table::{TableSchema, ViewMode};
use crate::storage::adapter::idx_table;
use crate::writer::row_writer::{write_row, WriteFlags};

/// Fill this row's view-projected columns before it is written.
///
/// Per view: nothing happens unless the incoming row sets the view's pk
/// column to a new value. A null reference nulls the projections; a live
/// reference copies the mapped columns; a missing referenced row nulls
/// them in Live mode and leaves them untouched in Ghost mode.
pub fn project_local(
    ctx: &Ctx,
    schema: &TableSchema,
    row: &mut Row,
    old: Option<&Row>,
) -> Result<()> {
    for view in &schema.views {
        let Some(reference) = row.get(&view.pk_column).cloned() else {
            continue;
        };
        if let Some(old_row) = old {
            if old_row.get(&view.pk_column) == Some(&reference) {
                continue;
            }
        }

        if reference.is_null() {
            null_projections(row, &view.columns);
            continue;
        }

        let source_row = match value_to_key(&reference) {
            Some(key) => ctx.adapter.read(&view.source_table, &key)?,
            None => None,
        };
        match source_row {
            Some(source) => {
                for (local, remote) in &view.columns {
                    row.insert(
                        local.clone(),
                        source.get(remote).cloned().unwrap_or(Value::Null),
                    );
                }
            }
            None => {
                if view.mode == ViewMode::Live {
                    null_projections(row, &view.columns);
                }
            }
        }
    }
    Ok(())
}

/// Push a change of table `source` outward: every table projecting from it
/// re-copies the mapped columns of the affected rows. `new_row = None`
/// means the source row was deleted, which nulls Live projections and
/// leaves Ghost ones as a stale snapshot.
pub fn project_remote(
    ctx: &Ctx,
    source: &TableSchema,
    source_pk: &Value,
    new_row: Option<&Row>,
    depth: usize,
) -> Result<()> {
    if depth >= ctx.config.view_hop_limit {
        warn!(table = %source.name, depth, "view projection hop limit reached");
        return Ok(());
    }

    for (remote_schema, view) in ctx.schema.remote_views(&source.name) {
        if new_row.is_none() && view.mode == ViewMode::Ghost {
            continue;
        }
        let Some(key) = value_to_key(source_pk) else {
            continue;
        };
        let index_table = idx_table(&remote_schema.name, &view.pk_column);
        let affected = secondary::read_pks(ctx.adapter, &index_table, &key)?;
        if affected.is_empty() {
            continue;
        }
        debug!(
            source = %source.name,
            remote = %remote_schema.name,
            rows = affected.len(),
            "remote view projection"
        );

        for pk in affected {
            let Some(remote_row) = ctx.adapter.read(&remote_schema.name, &pk)? else {
                continue;
            };
            let mut updated = remote_row.clone();
            match new_row {
                Some(source_row) => {
                    for (local, remote) in &view.columns {
                        updated.insert(
                            local.clone(),
                            source_row.get(remote).cloned().unwrap_or(Value::Null),
                        );
                    }
                }
                None => null_projections(&mut updated, &view.columns),
            }
            if updated == remote_row {
                continue;
            }
            write_row(
                ctx,
                remote_schema,
                updated,
                &WriteFlags {
                    skip_orm: true,
                    rebuild_search: false,
                    depth: depth + 1,
                },
            )?;
        }
    }
    Ok(())
}

fn null_projections(row: &mut Row, columns: &[(String, String)]) {
    for (local, _) in columns {
        row.insert(local.clone(), Value::Null);
    }
}
