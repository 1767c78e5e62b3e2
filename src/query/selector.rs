use std::collections::HashSet;
use tracing::trace;

use crate::core::error::{Error, Result};
use crate::core::types::{value_to_key, Row, RowKey, Value};
use crate::index::secondary;
use crate::query::context::Ctx;
use crate::query::descriptor::{Condition, Operator, Query, WhereExpr, WhereItem};
use crate::query::evaluator::{leaf_key, Evaluator, SearchSideCache};
use crate::schema::table::TableSchema;
use crate::search::lookup::{parse_search_path, search_rows, SearchMatch, Threshold};
use crate::storage::adapter::{idx_table, RangeSpec};

/// Fetch the rows a query operates on, choosing the cheapest strategy:
/// trie prefix, direct range, indexed fast path, fast/slow hybrid, or full
/// scan. Joins fetch nothing here; the join stage builds its own row set.
pub fn select_rows(ctx: &Ctx, schema: &TableSchema, query: &Query) -> Result<Vec<Row>> {
    if query.join.is_some() {
        return Ok(Vec::new());
    }

    if let Some(trie) = &query.trie {
        return trie_lookup(ctx, schema, &trie.column, &trie.prefix);
    }

    if let Some((limit, offset)) = query.range {
        return range_select(ctx, schema, limit, offset);
    }

    if let Some(filter) = &query.where_fn {
        let mut rows = Vec::new();
        ctx.adapter
            .range_read(&schema.name, RangeSpec::FULL, &mut |row, idx| {
                if filter(&row, idx) {
                    rows.push(row);
                }
                Ok(())
            })?;
        return Ok(rows);
    }

    let Some(where_) = &query.where_ else {
        return full_scan(ctx, schema);
    };

    match analyze(schema, where_) {
        Plan::FastLeaf(cond) => {
            trace!(table = %schema.name, "selector: fast leaf");
            Ok(dedup_by_pk(schema, exec_fast_leaf(ctx, schema, cond)?))
        }
        Plan::FastList(items) => {
            trace!(table = %schema.name, "selector: fast list");
            let mut merged: Vec<Row> = Vec::new();
            let mut started = false;
            let mut pending_or = false;
            for item in items {
                match item {
                    WhereItem::And => pending_or = false,
                    WhereItem::Or => pending_or = true,
                    WhereItem::Cond(cond) => {
                        let leaf_rows = exec_fast_leaf(ctx, schema, cond)?;
                        if !started {
                            merged = leaf_rows;
                            started = true;
                        } else if pending_or {
                            union_rows(schema, &mut merged, leaf_rows);
                        } else {
                            intersect_rows(schema, &mut merged, &leaf_rows);
                        }
                    }
                }
            }
            Ok(dedup_by_pk(schema, merged))
        }
        Plan::Hybrid { fast, rest } => {
            trace!(table = %schema.name, "selector: fast prefix + residual filter");
            let mut rows: Vec<Row> = Vec::new();
            let mut started = false;
            for cond in fast {
                let leaf_rows = exec_fast_leaf(ctx, schema, cond)?;
                if !started {
                    rows = leaf_rows;
                    started = true;
                } else {
                    intersect_rows(schema, &mut rows, &leaf_rows);
                }
            }
            let residual = WhereExpr::List(rest);
            let cache = build_search_cache(ctx, schema, &residual)?;
            let evaluator = Evaluator::new(&schema.primary_key).with_search_cache(&cache);
            rows.retain(|row| evaluator.matches(&residual, row));
            Ok(dedup_by_pk(schema, rows))
        }
        Plan::Slow => {
            trace!(table = %schema.name, "selector: full scan");
            let cache = build_search_cache(ctx, schema, where_)?;
            let evaluator = Evaluator::new(&schema.primary_key).with_search_cache(&cache);
            let mut rows = Vec::new();
            ctx.adapter
                .range_read(&schema.name, RangeSpec::FULL, &mut |row, _| {
                    if evaluator.matches(where_, &row) {
                        rows.push(row);
                    }
                    Ok(())
                })?;
            Ok(rows)
        }
    }
}

enum Plan<'a> {
    FastLeaf(&'a Condition),
    FastList(&'a [WhereItem]),
    Hybrid {
        fast: Vec<&'a Condition>,
        rest: Vec<WhereItem>,
    },
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FastKind {
    Pk,
    Index,
    Search,
}

fn fast_kind(schema: &TableSchema, cond: &Condition) -> Option<FastKind> {
    if cond.path.starts_with("search(") {
        return matches!(cond.op, Operator::Eq | Operator::Gt | Operator::Lt)
            .then_some(FastKind::Search);
    }
    let indexed = if cond.path == schema.primary_key {
        FastKind::Pk
    } else if schema.secondary_indexes.contains(&cond.path) {
        FastKind::Index
    } else {
        return None;
    };
    matches!(cond.op, Operator::Eq | Operator::In | Operator::Between).then_some(indexed)
}

/// Strategy choice over a WHERE tree: a lone fast leaf, a list of all-fast
/// leaves, a fast AND-prefix followed by slow residue, or a scan.
fn analyze<'a>(schema: &TableSchema, where_: &'a WhereExpr) -> Plan<'a> {
    let items = match where_ {
        WhereExpr::Leaf(cond) => {
            return if fast_kind(schema, cond).is_some() {
                Plan::FastLeaf(cond)
            } else {
                Plan::Slow
            };
        }
        WhereExpr::List(items) => items,
    };

    let all_fast = items.iter().all(|item| match item {
        WhereItem::Cond(cond) => fast_kind(schema, cond).is_some(),
        _ => true,
    });
    if all_fast {
        return Plan::FastList(items);
    }

    // leading fast leaves joined by AND, then a slow remainder
    let has_or = items.iter().any(|i| matches!(i, WhereItem::Or));
    if has_or {
        return Plan::Slow;
    }
    let mut fast = Vec::new();
    let mut split = 0;
    for (i, item) in items.iter().enumerate() {
        match item {
            WhereItem::Cond(cond) if fast_kind(schema, cond).is_some() => {
                fast.push(cond);
                split = i + 1;
            }
            WhereItem::Cond(_) => break,
            _ => {}
        }
    }
    if fast.is_empty() {
        return Plan::Slow;
    }
    let rest: Vec<WhereItem> = items[split..]
        .iter()
        .skip_while(|i| matches!(i, WhereItem::And))
        .cloned()
        .collect();
    if rest.is_empty() {
        return Plan::FastList(items);
    }
    Plan::Hybrid { fast, rest }
}

fn exec_fast_leaf(ctx: &Ctx, schema: &TableSchema, cond: &Condition) -> Result<Vec<Row>> {
    match fast_kind(schema, cond) {
        Some(FastKind::Pk) => match cond.op {
            Operator::Eq => {
                let Some(key) = value_to_key(&cond.value) else {
                    return Ok(Vec::new());
                };
                Ok(ctx
                    .adapter
                    .read(&schema.name, &key)?
                    .into_iter()
                    .collect())
            }
            Operator::In => {
                let keys = value_keys(&cond.value);
                ctx.adapter.batch_read(&schema.name, &keys)
            }
            Operator::Between => {
                let Some((from, to)) = between_keys(&cond.value) else {
                    return Ok(Vec::new());
                };
                let mut rows = Vec::new();
                ctx.adapter.range_read(
                    &schema.name,
                    RangeSpec::Keys { from: &from, to: &to },
                    &mut |row, _| {
                        rows.push(row);
                        Ok(())
                    },
                )?;
                Ok(rows)
            }
            _ => Ok(Vec::new()),
        },
        Some(FastKind::Index) => {
            let index_table = idx_table(&schema.name, &cond.path);
            let pks = match cond.op {
                Operator::Eq => {
                    let Some(key) = value_to_key(&cond.value) else {
                        return Ok(Vec::new());
                    };
                    secondary::read_pks(ctx.adapter, &index_table, &key)?
                }
                Operator::In => {
                    let mut pks = Vec::new();
                    for key in value_keys(&cond.value) {
                        for pk in secondary::read_pks(ctx.adapter, &index_table, &key)? {
                            if !pks.contains(&pk) {
                                pks.push(pk);
                            }
                        }
                    }
                    pks
                }
                Operator::Between => {
                    let Some((from, to)) = between_keys(&cond.value) else {
                        return Ok(Vec::new());
                    };
                    secondary::range_pks(ctx.adapter, &index_table, &from, &to)?
                }
                _ => Vec::new(),
            };
            ctx.adapter.batch_read(&schema.name, &pks)
        }
        Some(FastKind::Search) => {
            let columns = parse_search_path(&cond.path)
                .ok_or_else(|| Error::schema(format!("bad search path '{}'", cond.path)))?;
            let (term, threshold) = search_params(cond);
            let matches = search_rows(
                ctx.adapter,
                schema,
                ctx.tokenizer_hook,
                ctx.config.fuzzy_edit_distance,
                &columns,
                &term,
                threshold,
            )?;
            fetch_adorned(ctx, schema, &matches)
        }
        None => Ok(Vec::new()),
    }
}

/// Term and threshold of a search leaf. The value is the term; an explicit
/// threshold rides along as `[term, threshold]`.
fn search_params(cond: &Condition) -> (String, Threshold) {
    let (term, explicit) = match &cond.value {
        Value::Array(items) if items.len() == 2 => (
            items[0].stringify(),
            items[1].as_f64(),
        ),
        other => (other.stringify(), None),
    };
    let threshold = match cond.op {
        Operator::Gt => Threshold::Above(explicit.unwrap_or(0.0)),
        Operator::Lt => Threshold::Below(explicit.unwrap_or(1.0)),
        _ => Threshold::Exact,
    };
    (term, threshold)
}

/// Read matched rows and attach the `_weight` / `_locations` diagnostics,
/// preserving score order.
fn fetch_adorned(ctx: &Ctx, schema: &TableSchema, matches: &[SearchMatch]) -> Result<Vec<Row>> {
    let pks: Vec<RowKey> = matches.iter().map(|m| m.pk.clone()).collect();
    let rows = ctx.adapter.batch_read(&schema.name, &pks)?;
    Ok(rows
        .into_iter()
        .map(|mut row| {
            let pk = row.get(&schema.primary_key).and_then(value_to_key);
            if let Some(found) = matches.iter().find(|m| Some(&m.pk) == pk.as_ref()) {
                row.insert("_weight".to_string(), Value::Number(found.weight));
                row.insert("_locations".to_string(), found.locations.clone());
            }
            row
        })
        .collect())
}

/// Pre-execute every `search(...)` leaf of a tree into the evaluator's
/// side cache, one lookup per leaf.
fn build_search_cache(ctx: &Ctx, schema: &TableSchema, where_: &WhereExpr) -> Result<SearchSideCache> {
    let mut cache = SearchSideCache::new();
    let mut leaves: Vec<&Condition> = Vec::new();
    match where_ {
        WhereExpr::Leaf(cond) => leaves.push(cond),
        WhereExpr::List(items) => {
            for item in items {
                if let WhereItem::Cond(cond) = item {
                    leaves.push(cond);
                }
            }
        }
    }
    for cond in leaves {
        if !cond.path.starts_with("search(") {
            continue;
        }
        let Some(columns) = parse_search_path(&cond.path) else {
            continue;
        };
        let (term, threshold) = search_params(cond);
        let matches = search_rows(
            ctx.adapter,
            schema,
            ctx.tokenizer_hook,
            ctx.config.fuzzy_edit_distance,
            &columns,
            &term,
            threshold,
        )?;
        cache.insert(
            leaf_key(cond),
            matches.into_iter().map(|m| m.pk).collect(),
        );
    }
    Ok(cache)
}

fn trie_lookup(ctx: &Ctx, schema: &TableSchema, column: &str, prefix: &str) -> Result<Vec<Row>> {
    if !schema.trie_columns.contains(column) {
        return Err(Error::schema(format!(
            "column '{}' of table '{}' has no trie index",
            column, schema.name
        )));
    }
    let mut tries = ctx.tries.write();
    let pks = match tries.get_mut(&(schema.name.clone(), column.to_string())) {
        Some(index) => index.search_prefix(prefix)?,
        None => Vec::new(),
    };
    drop(tries);
    ctx.adapter.batch_read(&schema.name, &pks)
}

/// Direct range over pk order. A negative limit addresses the table tail:
/// the last `|limit|` rows, skipping `offset` from the end.
fn range_select(ctx: &Ctx, schema: &TableSchema, limit: i64, offset: usize) -> Result<Vec<Row>> {
    let (from, to) = if limit > 0 {
        (offset, offset.saturating_add(limit as usize))
    } else if limit < 0 {
        let count = ctx.adapter.row_count(&schema.name)?;
        let to = count.saturating_sub(offset);
        (to.saturating_sub(limit.unsigned_abs() as usize), to)
    } else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    ctx.adapter
        .range_read(&schema.name, RangeSpec::Offsets { from, to }, &mut |row, _| {
            rows.push(row);
            Ok(())
        })?;
    Ok(rows)
}

fn full_scan(ctx: &Ctx, schema: &TableSchema) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    ctx.adapter
        .range_read(&schema.name, RangeSpec::FULL, &mut |row, _| {
            rows.push(row);
            Ok(())
        })?;
    Ok(rows)
}

fn row_pk(schema: &TableSchema, row: &Row) -> Option<RowKey> {
    row.get(&schema.primary_key).and_then(value_to_key)
}

fn value_keys(value: &Value) -> Vec<RowKey> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(value_to_key).collect())
        .unwrap_or_default()
}

fn between_keys(value: &Value) -> Option<(RowKey, RowKey)> {
    let bounds = value.as_array()?;
    if bounds.len() != 2 {
        return None;
    }
    Some((value_to_key(&bounds[0])?, value_to_key(&bounds[1])?))
}

fn intersect_rows(schema: &TableSchema, current: &mut Vec<Row>, other: &[Row]) {
    let keep: HashSet<Option<RowKey>> = other.iter().map(|r| row_pk(schema, r)).collect();
    current.retain(|row| keep.contains(&row_pk(schema, row)));
}

fn union_rows(schema: &TableSchema, current: &mut Vec<Row>, other: Vec<Row>) {
    let seen: HashSet<Option<RowKey>> = current.iter().map(|r| row_pk(schema, r)).collect();
    for row in other {
        if !seen.contains(&row_pk(schema, &row)) {
            current.push(row);
        }
    }
}

/// First-seen-order de-duplication by primary key.
fn dedup_by_pk(schema: &TableSchema, rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row_pk(schema, row)))
        .collect()
}
