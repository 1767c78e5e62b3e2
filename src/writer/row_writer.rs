use tracing::debug;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{merge_rows, value_to_key, Row, RowKey};
use crate::index::{search_index, secondary};
use crate::orm::sync;
use crate::query::context::Ctx;
use crate::query::descriptor::{ActionArgs, Query, WriteSummary};
use crate::query::selector::select_rows;
use crate::schema::table::TableSchema;
use crate::storage::adapter::{idx_table, search_fuzzy_table, search_table, search_tokens_table};
use crate::view::projector;

/// Execution flags threaded through the write fan-out. `skip_orm` marks
/// synchronizer-originated writes (the `_orm_skip` comment); `depth`
/// counts projection/sync hops against the configured cap.
pub struct WriteFlags {
    pub skip_orm: bool,
    pub rebuild_search: bool,
    pub depth: usize,
}

impl WriteFlags {
    pub fn from_query(query: &Query) -> Self {
        WriteFlags {
            skip_orm: query.has_comment("_orm_skip"),
            rebuild_search: query.has_comment("_rebuild_search_index"),
            depth: 0,
        }
    }
}

/// Upsert entry point. With a WHERE (or range/trie) present the action
/// args merge into every selected row; otherwise the args row itself is
/// written, inserting or updating by its primary key.
pub fn upsert(ctx: &Ctx, schema: &TableSchema, query: &Query) -> Result<WriteSummary> {
    let ActionArgs::Row(patch) = &query.args else {
        return Err(Error::new(ErrorKind::Query, "upsert requires a row argument"));
    };
    let flags = WriteFlags::from_query(query);

    let has_filter = query.where_.is_some()
        || query.where_fn.is_some()
        || query.range.is_some()
        || query.trie.is_some();

    let mut affected_rows = Vec::new();
    if has_filter {
        for target in select_rows(ctx, schema, query)? {
            affected_rows.push(write_row(ctx, schema, merge_rows(&target, patch), &flags)?);
        }
    } else {
        affected_rows.push(write_row(ctx, schema, patch.clone(), &flags)?);
    }

    Ok(summary("upserted", schema, affected_rows))
}

/// Delete entry point: selected rows with a filter, the whole table
/// without one.
pub fn delete(ctx: &Ctx, schema: &TableSchema, query: &Query) -> Result<WriteSummary> {
    let flags = WriteFlags::from_query(query);
    let targets = select_rows(ctx, schema, query)?;

    let mut affected_rows = Vec::new();
    for target in targets {
        delete_row(ctx, schema, &target, &flags)?;
        affected_rows.push(target);
    }
    Ok(summary("deleted", schema, affected_rows))
}

/// Drop the table and every derived table riding on it.
pub fn drop_table(ctx: &Ctx, schema: &TableSchema) -> Result<WriteSummary> {
    ctx.adapter.drop_table(&schema.name)?;
    for column in &schema.secondary_indexes {
        ctx.adapter.drop_table(&idx_table(&schema.name, column))?;
    }
    for column in schema.search_columns.keys() {
        ctx.adapter.drop_table(&search_table(&schema.name, column))?;
        ctx.adapter.drop_table(&search_fuzzy_table(&schema.name, column))?;
        ctx.adapter.drop_table(&search_tokens_table(&schema.name, column))?;
    }
    for column in &schema.trie_columns {
        if let Some(trie) = ctx
            .tries
            .write()
            .get_mut(&(schema.name.clone(), column.clone()))
        {
            trie.clear();
        }
    }
    ctx.cache.invalidate(&schema.name);

    Ok(WriteSummary {
        msg: format!("table '{}' dropped", schema.name),
        affected_pks: Vec::new(),
        affected_rows: Vec::new(),
    })
}

/// The per-row write pipeline: read the existing row (when a pk is given),
/// merge, project local views, write, update the derived indexes against
/// the stored row, then fan out to ORM back-references and remote views.
/// Derived-index updates stay ordered with the source write; fan-out to
/// other tables happens last.
pub fn write_row(ctx: &Ctx, schema: &TableSchema, incoming: Row, flags: &WriteFlags) -> Result<Row> {
    let pk = incoming
        .get(&schema.primary_key)
        .filter(|v| !v.is_null())
        .and_then(value_to_key);

    // fresh primary keys skip the existing-row lookup
    let old = match &pk {
        Some(key) => ctx.adapter.read(&schema.name, key)?,
        None => None,
    };

    let mut merged = match &old {
        Some(existing) => merge_rows(existing, &incoming),
        None => with_defaults(schema, incoming),
    };

    projector::project_local(ctx, schema, &mut merged, old.as_ref())?;

    let stored = ctx.adapter.write(&schema.name, pk.as_ref(), merged)?;
    let stored_pk = stored
        .get(&schema.primary_key)
        .and_then(value_to_key)
        .ok_or_else(|| Error::adapter("write returned a row without a primary key"))?;

    secondary::update_for_write(ctx.adapter, schema, old.as_ref(), &stored, &stored_pk)?;
    search_index::update_for_write(
        ctx.adapter,
        schema,
        ctx.tokenizer_hook,
        &stored,
        &stored_pk,
        flags.rebuild_search,
    )?;
    update_tries(ctx, schema, old.as_ref(), Some(&stored), &stored_pk);

    ctx.cache.invalidate(&schema.name);
    debug!(table = %schema.name, "row written");

    if !flags.skip_orm {
        sync::sync_on_write(ctx, schema, old.as_ref(), &stored, &stored_pk, flags.depth)?;
    }
    projector::project_remote(
        ctx,
        schema,
        &stored_pk.to_value(),
        Some(&stored),
        flags.depth,
    )?;

    Ok(stored)
}

/// The per-row delete pipeline; the inverse of [`write_row`], with the
/// stored token record driving the search retraction.
pub fn delete_row(ctx: &Ctx, schema: &TableSchema, old: &Row, flags: &WriteFlags) -> Result<()> {
    let Some(pk) = old.get(&schema.primary_key).and_then(value_to_key) else {
        return Ok(());
    };

    search_index::retract_for_delete(ctx.adapter, schema, &pk)?;
    secondary::retract_for_delete(ctx.adapter, schema, old, &pk)?;
    update_tries(ctx, schema, Some(old), None, &pk);

    ctx.adapter.delete(&schema.name, &pk)?;
    ctx.cache.invalidate(&schema.name);
    debug!(table = %schema.name, "row deleted");

    if !flags.skip_orm {
        sync::sync_on_delete(ctx, schema, old, &pk, flags.depth)?;
    }
    projector::project_remote(ctx, schema, &pk.to_value(), None, flags.depth)?;
    Ok(())
}

fn with_defaults(schema: &TableSchema, mut row: Row) -> Row {
    for column in &schema.columns {
        if let Some(default) = &column.default {
            row.entry(column.name.clone()).or_insert_with(|| default.clone());
        }
    }
    row
}

fn update_tries(
    ctx: &Ctx,
    schema: &TableSchema,
    old: Option<&Row>,
    new: Option<&Row>,
    pk: &RowKey,
) {
    if schema.trie_columns.is_empty() {
        return;
    }
    let mut tries = ctx.tries.write();
    for column in &schema.trie_columns {
        let old_value = old.and_then(|r| r.get(column)).filter(|v| !v.is_null());
        let new_value = new.and_then(|r| r.get(column)).filter(|v| !v.is_null());
        if old_value == new_value {
            continue;
        }
        let Some(trie) = tries.get_mut(&(schema.name.clone(), column.clone())) else {
            continue;
        };
        if let Some(value) = old_value {
            trie.remove(&value.stringify(), pk);
        }
        if let Some(value) = new_value {
            trie.insert(&value.stringify(), pk.clone());
        }
    }
}

fn summary(verb: &str, schema: &TableSchema, affected_rows: Vec<Row>) -> WriteSummary {
    let affected_pks = affected_rows
        .iter()
        .filter_map(|row| row.get(&schema.primary_key).and_then(value_to_key))
        .collect::<Vec<_>>();
    WriteSummary {
        msg: format!("{} row(s) {}", affected_rows.len(), verb),
        affected_pks,
        affected_rows,
    }
}
