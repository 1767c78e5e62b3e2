use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::types::{merge_rows, Row, Value};
use crate::query::cache::fingerprint;
use crate::query::context::Ctx;
use crate::query::descriptor::{Action, ActionArgs, Query, QueryResult, TableRef, WriteSummary};
use crate::query::evaluator::Evaluator;
use crate::query::mutator;
use crate::query::selector::select_rows;
use crate::writer::row_writer;

/// Entry point: validate, route by action, manage the result cache.
pub fn execute(ctx: &Ctx, query: &Query) -> Result<QueryResult> {
    validate(query)?;

    if let TableRef::Rows(rows) = &query.table {
        return instance_table(query, rows.clone());
    }

    match query.action {
        Action::ShowTables => Ok(QueryResult::Rows(show_tables(ctx))),
        Action::Describe => describe(ctx, query),
        Action::Select => select(ctx, query),
        Action::Upsert => {
            let schema = ctx.schema.get(required_table(query)?)?;
            Ok(QueryResult::Write(row_writer::upsert(ctx, schema, query)?))
        }
        Action::Delete => {
            let schema = ctx.schema.get(required_table(query)?)?;
            Ok(QueryResult::Write(row_writer::delete(ctx, schema, query)?))
        }
        Action::Drop => {
            let schema = ctx.schema.get(required_table(query)?)?;
            Ok(QueryResult::Write(row_writer::drop_table(ctx, schema)?))
        }
    }
}

/// Schema-misuse checks. All of these are fatal before any effect.
fn validate(query: &Query) -> Result<()> {
    let filters = [
        query.where_.is_some() || query.where_fn.is_some(),
        query.range.is_some(),
        query.trie.is_some(),
    ];
    if filters.iter().filter(|f| **f).count() > 1 {
        return Err(Error::schema(
            "only one of WHERE, range and trie may be used per query",
        ));
    }
    if query.join.is_some() && !query.orm.is_empty() {
        return Err(Error::schema("join and orm cannot be combined"));
    }
    if matches!(query.table, TableRef::Rows(_))
        && (query.join.is_some() || !query.orm.is_empty() || query.trie.is_some())
    {
        return Err(Error::schema(
            "instance tables do not support join, orm or trie",
        ));
    }
    Ok(())
}

fn required_table(query: &Query) -> Result<&str> {
    query
        .table_name()
        .ok_or_else(|| Error::schema("this action requires a named table"))
}

fn select(ctx: &Ctx, query: &Query) -> Result<QueryResult> {
    let table = required_table(query)?;
    let schema = ctx.schema.get(table)?;

    let cacheable = ctx.config.cache_enabled
        && query.join.is_none()
        && query.orm.is_empty()
        && query.where_fn.is_none();
    let key = if cacheable { fingerprint(query) } else { None };

    if let Some(fp) = key {
        if let Some(cached) = ctx.cache.get(table, fp) {
            debug!(table, "select served from cache");
            return Ok(QueryResult::Rows((*cached).clone()));
        }
    }

    let selected = select_rows(ctx, schema, query)?;
    let rows = mutator::run(ctx, schema, query, selected)?;

    if let Some(fp) = key {
        ctx.cache.put(table, fp, Arc::new(rows.clone()));
    }
    Ok(QueryResult::Rows(rows))
}

fn show_tables(ctx: &Ctx) -> Vec<Row> {
    ctx.schema
        .table_names()
        .into_iter()
        .map(|name| {
            let mut row = Row::new();
            row.insert("table".to_string(), Value::String(name));
            row
        })
        .collect()
}

fn describe(ctx: &Ctx, query: &Query) -> Result<QueryResult> {
    let schema = ctx.schema.get(required_table(query)?)?;
    let rows = schema
        .columns
        .iter()
        .map(|column| {
            let mut row: Row = BTreeMap::new();
            row.insert("column".to_string(), Value::String(column.name.clone()));
            row.insert(
                "kind".to_string(),
                Value::String(format!("{:?}", column.kind)),
            );
            row.insert(
                "default".to_string(),
                column.default.clone().unwrap_or(Value::Null),
            );
            row.insert(
                "primary_key".to_string(),
                Value::Bool(column.name == schema.primary_key),
            );
            row
        })
        .collect();
    Ok(QueryResult::Rows(rows))
}

/// Ad-hoc row lists run an in-memory path: SELECT applies WHERE/range
/// only, UPSERT shallow-merges into matching rows, DELETE filters them
/// out, DROP empties the list. Nothing is cached and nothing is stored.
fn instance_table(query: &Query, rows: Vec<Row>) -> Result<QueryResult> {
    let evaluator = Evaluator::new("");
    let matches = |row: &Row, idx: usize| -> bool {
        if let Some(where_) = &query.where_ {
            return evaluator.matches(where_, row);
        }
        if let Some(filter) = &query.where_fn {
            return filter(row, idx);
        }
        true
    };

    match query.action {
        Action::Select => {
            let mut out: Vec<Row> = rows
                .into_iter()
                .enumerate()
                .filter(|(idx, row)| matches(row, *idx))
                .map(|(_, row)| row)
                .collect();
            if let Some((limit, offset)) = query.range {
                out = range_slice(out, limit, offset);
            }
            Ok(QueryResult::Rows(out))
        }
        Action::Upsert => {
            let ActionArgs::Row(patch) = &query.args else {
                return Err(Error::new(
                    crate::core::error::ErrorKind::Query,
                    "upsert requires a row argument",
                ));
            };
            let out: Vec<Row> = rows
                .into_iter()
                .enumerate()
                .map(|(idx, row)| {
                    if matches(&row, idx) {
                        merge_rows(&row, patch)
                    } else {
                        row
                    }
                })
                .collect();
            Ok(QueryResult::Rows(out))
        }
        Action::Delete => {
            let out: Vec<Row> = rows
                .into_iter()
                .enumerate()
                .filter(|(idx, row)| !matches(row, *idx))
                .map(|(_, row)| row)
                .collect();
            Ok(QueryResult::Rows(out))
        }
        Action::Drop => Ok(QueryResult::Rows(Vec::new())),
        _ => Ok(QueryResult::Write(WriteSummary {
            msg: "unsupported instance-table action".to_string(),
            affected_pks: Vec::new(),
            affected_rows: Vec::new(),
        })),
    }
}

fn range_slice(rows: Vec<Row>, limit: i64, offset: usize) -> Vec<Row> {
    if limit >= 0 {
        rows.into_iter().skip(offset).take(limit as usize).collect()
    } else {
        let len = rows.len();
        let to = len.saturating_sub(offset);
        let from = to.saturating_sub(limit.unsigned_abs() as usize);
        rows.into_iter().skip(from).take(to - from).collect()
    }
}
