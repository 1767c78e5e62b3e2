use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::core::error::{Error, Result};
use crate::core::types::{path_value, Row, Value};
use crate::query::context::Ctx;
use crate::query::descriptor::{
    JoinArgs, JoinType, Operator, OrmArgs, OrmInclude, Query, SortOrder, WhereExpr, WhereItem,
};
use crate::query::evaluator::{compare_values, Evaluator};
use crate::query::functions::FnKind;
use crate::query::selector::select_rows;
use crate::schema::table::TableSchema;
use crate::storage::adapter::RangeSpec;

/// Post-selection row mutation, stages in fixed order:
/// join → groupBy → orm → projection/functions → having → orderBy →
/// offset → limit.
pub fn run(ctx: &Ctx, schema: &TableSchema, query: &Query, mut rows: Vec<Row>) -> Result<Vec<Row>> {
    if let Some(join) = &query.join {
        rows = join_stage(ctx, schema, query, join)?;
    }

    let buckets = if query.group_by.is_empty() {
        None
    } else {
        Some(group_stage(&query.group_by, &mut rows))
    };

    if !query.orm.is_empty() {
        orm_stage(ctx, schema, &query.orm, &mut rows)?;
    }

    if let crate::query::descriptor::ActionArgs::Columns(selections) = &query.args {
        if !selections.is_empty() {
            rows = projection_stage(ctx, query, selections, rows, buckets.as_deref())?;
        }
    }

    if let Some(having) = &query.having {
        let evaluator = Evaluator {
            pk_column: &schema.primary_key,
            ignore_first_path: query.join.is_some(),
            search_cache: None,
        };
        rows.retain(|row| evaluator.matches(having, row));
    }

    if !query.order_by.is_empty() {
        order_stage(&query.order_by, &mut rows);
    }

    if let Some(offset) = query.offset {
        rows = rows.into_iter().skip(offset).collect();
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }

    Ok(rows)
}

// --- join ---------------------------------------------------------------

/// Nested-loop join. Joined rows are keyed `"table.column"`; unmatched
/// first-side rows fill the other side with nulls for left/right/outer,
/// and outer additionally appends unmatched second-side rows. WHERE and
/// range riding alongside a join apply after it.
fn join_stage(ctx: &Ctx, schema: &TableSchema, query: &Query, join: &JoinArgs) -> Result<Vec<Row>> {
    let right_schema = ctx.schema.get(&join.table)?;

    let left_rows = scan_all(ctx, &schema.name)?;
    let right_rows = scan_all(ctx, &join.table)?;

    // a right join walks the second table as the driving side
    let (first, second, first_name, second_name) = match join.kind {
        JoinType::Right => (&right_rows, &left_rows, join.table.as_str(), schema.name.as_str()),
        _ => (&left_rows, &right_rows, schema.name.as_str(), join.table.as_str()),
    };
    let second_columns = column_names(
        if matches!(join.kind, JoinType::Right) { schema } else { right_schema },
        second,
    );
    let first_columns = column_names(
        if matches!(join.kind, JoinType::Right) { right_schema } else { schema },
        first,
    );

    let mut joined = Vec::new();
    let mut matched_second: BTreeSet<usize> = BTreeSet::new();

    for first_row in first {
        let mut matched = false;
        for (second_idx, second_row) in second.iter().enumerate() {
            let candidate = merge_joined(first_name, first_row, second_name, Some(second_row), &[]);
            let keep = match (join.kind, &join.on) {
                (JoinType::Cross, _) | (_, None) => true,
                (_, Some((left_path, op, right_path))) => compare_values(
                    *op,
                    &path_value(&candidate, left_path),
                    &path_value(&candidate, right_path),
                ),
            };
            if keep {
                matched = true;
                matched_second.insert(second_idx);
                joined.push(candidate);
            }
        }
        if !matched && matches!(join.kind, JoinType::Left | JoinType::Right | JoinType::Outer) {
            joined.push(merge_joined(
                first_name,
                first_row,
                second_name,
                None,
                &second_columns,
            ));
        }
    }

    if matches!(join.kind, JoinType::Outer) {
        for (second_idx, second_row) in second.iter().enumerate() {
            if !matched_second.contains(&second_idx) {
                joined.push(merge_joined(
                    second_name,
                    second_row,
                    first_name,
                    None,
                    &first_columns,
                ));
            }
        }
    }

    // WHERE / range apply post-join
    if let Some(where_) = &query.where_ {
        let evaluator = Evaluator::new(&schema.primary_key);
        joined.retain(|row| evaluator.matches(where_, row));
    }
    if let Some(filter) = &query.where_fn {
        joined = joined
            .into_iter()
            .enumerate()
            .filter(|(idx, row)| filter(row, *idx))
            .map(|(_, row)| row)
            .collect();
    }
    if let Some((limit, offset)) = query.range {
        joined = apply_range(joined, limit, offset);
    }

    Ok(joined)
}

fn scan_all(ctx: &Ctx, table: &str) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    ctx.adapter.range_read(table, RangeSpec::FULL, &mut |row, _| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

fn column_names(schema: &TableSchema, rows: &[Row]) -> Vec<String> {
    let mut names: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
    if !names.contains(&schema.primary_key) {
        names.insert(0, schema.primary_key.clone());
    }
    if names.is_empty() {
        if let Some(first) = rows.first() {
            names = first.keys().cloned().collect();
        }
    }
    names
}

fn merge_joined(
    a_name: &str,
    a_row: &Row,
    b_name: &str,
    b_row: Option<&Row>,
    b_columns: &[String],
) -> Row {
    let mut out = Row::new();
    for (k, v) in a_row {
        out.insert(format!("{}.{}", a_name, k), v.clone());
    }
    match b_row {
        Some(row) => {
            for (k, v) in row {
                out.insert(format!("{}.{}", b_name, k), v.clone());
            }
        }
        None => {
            for column in b_columns {
                out.insert(format!("{}.{}", b_name, column), Value::Null);
            }
        }
    }
    out
}

fn apply_range(rows: Vec<Row>, limit: i64, offset: usize) -> Vec<Row> {
    if limit >= 0 {
        rows.into_iter().skip(offset).take(limit as usize).collect()
    } else {
        let len = rows.len();
        let to = len.saturating_sub(offset);
        let from = to.saturating_sub(limit.unsigned_abs() as usize);
        rows.into_iter().skip(from).take(to - from).collect()
    }
}

// --- group by -----------------------------------------------------------

/// Sort by the group columns, then bucket by concatenated stringified
/// keys. The key parts join on `\u{0}` so dotted values cannot collide.
/// Returns bucket boundaries as index ranges into the sorted row list.
fn group_stage(group_by: &[(String, SortOrder)], rows: &mut Vec<Row>) -> Vec<std::ops::Range<usize>> {
    order_stage(group_by, rows);

    let mut buckets: Vec<std::ops::Range<usize>> = Vec::new();
    let mut current_key: Option<String> = None;
    let mut start = 0;

    for (idx, row) in rows.iter().enumerate() {
        let key = group_by
            .iter()
            .map(|(col, _)| path_value(row, col).stringify())
            .collect::<Vec<_>>()
            .join("\u{0}");
        match &current_key {
            Some(prev) if *prev == key => {}
            Some(_) => {
                buckets.push(start..idx);
                start = idx;
                current_key = Some(key);
            }
            None => current_key = Some(key),
        }
    }
    if !rows.is_empty() {
        buckets.push(start..rows.len());
    }
    buckets
}

// --- orm expansion ------------------------------------------------------

/// Replace relation columns with the related rows they point at, via a
/// sub-select per row honouring the include's clauses. Array-arity
/// relations yield an array (empty when nothing matched); single-arity
/// yield the row object or drop the key.
fn orm_stage(ctx: &Ctx, schema: &TableSchema, includes: &[OrmInclude], rows: &mut [Row]) -> Result<()> {
    for include in includes {
        let args = match include {
            OrmInclude::Key(key) => OrmArgs::key(key),
            OrmInclude::Spec(spec) => spec.clone(),
        };
        let Some(edge) = schema.orm_edge_for(&args.key) else {
            continue;
        };
        let related = ctx.schema.get(&edge.from_table)?;

        for row in rows.iter_mut() {
            let ids = match row.get(&args.key) {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Null) | None => Vec::new(),
                Some(single) => vec![single.clone()],
            };

            let mut expanded = if ids.is_empty() {
                Vec::new()
            } else {
                let mut sub = Query::select(&edge.from_table).where_(sub_where(
                    &related.primary_key,
                    ids,
                    args.where_.clone(),
                ));
                sub.order_by = args.order_by.clone();
                sub.group_by = args.group_by.clone();
                sub.offset = args.offset;
                sub.limit = Some(args.limit.unwrap_or(ctx.config.orm_default_limit));
                if let Some(select) = &args.select {
                    sub = sub.columns(&select.iter().map(String::as_str).collect::<Vec<_>>());
                }

                let fetched = select_rows(ctx, related, &sub)?;
                run(ctx, related, &sub, fetched)?
            };

            if edge.this_many {
                row.insert(
                    args.key.clone(),
                    Value::Array(expanded.into_iter().map(Value::Object).collect()),
                );
            } else if let Some(first) = expanded.drain(..).next() {
                row.insert(args.key.clone(), Value::Object(first));
            } else {
                row.remove(&args.key);
            }
        }
    }
    Ok(())
}

fn sub_where(pk_column: &str, ids: Vec<Value>, extra: Option<WhereExpr>) -> WhereExpr {
    let pk_in = WhereItem::Cond(crate::query::descriptor::Condition::new(
        pk_column,
        Operator::In,
        Value::Array(ids),
    ));
    match extra {
        None => WhereExpr::List(vec![pk_in]),
        Some(WhereExpr::Leaf(cond)) => {
            WhereExpr::List(vec![pk_in, WhereItem::And, WhereItem::Cond(cond)])
        }
        Some(WhereExpr::List(mut items)) => {
            let mut combined = vec![pk_in, WhereItem::And];
            combined.append(&mut items);
            WhereExpr::List(combined)
        }
    }
}

// --- projection & functions ---------------------------------------------

struct Selection {
    expr: String,
    alias: String,
    func: Option<(String, Vec<String>)>,
}

/// Parse `FN(arg, ...) AS alias` / `path AS alias` / `path` selections.
fn parse_selections(ctx: &Ctx, raw: &[String]) -> Result<Vec<Selection>> {
    raw.iter()
        .map(|entry| {
            let (expr, alias) = match entry.split_once(" AS ") {
                Some((e, a)) => (e.trim().to_string(), a.trim().to_string()),
                None => (entry.trim().to_string(), entry.trim().to_string()),
            };
            let func = match (expr.find('('), expr.ends_with(')')) {
                (Some(open), true) => {
                    let name = expr[..open].trim().to_string();
                    if !ctx.functions.contains(&name) {
                        return Err(Error::schema(format!("unknown function '{}'", name)));
                    }
                    let args = expr[open + 1..expr.len() - 1]
                        .split(',')
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty())
                        .collect();
                    Some((name, args))
                }
                _ => None,
            };
            Ok(Selection { expr, alias, func })
        })
        .collect()
}

fn projection_stage(
    ctx: &Ctx,
    query: &Query,
    raw: &[String],
    rows: Vec<Row>,
    buckets: Option<&[std::ops::Range<usize>]>,
) -> Result<Vec<Row>> {
    let selections = parse_selections(ctx, raw)?;
    let has_aggregate = selections.iter().any(|s| {
        s.func
            .as_ref()
            .and_then(|(name, _)| ctx.functions.get(name))
            .map(|f| f.kind == FnKind::Aggregate)
            .unwrap_or(false)
    });

    if has_aggregate {
        let groups: Vec<&[Row]> = match buckets {
            Some(ranges) => ranges.iter().map(|r| &rows[r.clone()]).collect(),
            None => vec![&rows[..]],
        };
        return groups
            .into_iter()
            .map(|bucket| project_bucket(ctx, query, &selections, bucket))
            .collect();
    }

    rows.iter()
        .map(|row| project_row(ctx, query, &selections, row))
        .collect()
}

/// One output row per bucket: aggregates collapse the bucket, plain paths
/// and scalars read the bucket's first row.
fn project_bucket(ctx: &Ctx, query: &Query, selections: &[Selection], bucket: &[Row]) -> Result<Row> {
    let representative = bucket.first().cloned().unwrap_or_default();
    let mut out = Row::new();
    for selection in selections {
        match &selection.func {
            Some((name, args)) => {
                let function = ctx
                    .functions
                    .get(name)
                    .ok_or_else(|| Error::schema(format!("unknown function '{}'", name)))?;
                let value = match function.kind {
                    FnKind::Aggregate => function.call_aggregate(bucket, args)?,
                    FnKind::Scalar => function.call_scalar(&representative, args)?,
                };
                out.insert(selection.alias.clone(), value);
            }
            None => {
                copy_projection(query, selection, &representative, &mut out);
            }
        }
    }
    Ok(out)
}

fn project_row(ctx: &Ctx, query: &Query, selections: &[Selection], row: &Row) -> Result<Row> {
    let mut out = Row::new();
    for selection in selections {
        match &selection.func {
            Some((name, args)) => {
                let function = ctx
                    .functions
                    .get(name)
                    .ok_or_else(|| Error::schema(format!("unknown function '{}'", name)))?;
                out.insert(selection.alias.clone(), function.call_scalar(row, args)?);
            }
            None => copy_projection(query, selection, row, &mut out),
        }
    }
    Ok(out)
}

/// Copy a plain path selection. `*` copies everything; `table.*` copies
/// the table's keys of a joined row, preserving their `table.col` form.
fn copy_projection(query: &Query, selection: &Selection, row: &Row, out: &mut Row) {
    if selection.expr == "*" {
        for (k, v) in row {
            out.insert(k.clone(), v.clone());
        }
        return;
    }
    if let Some(table) = selection.expr.strip_suffix(".*") {
        let prefix = format!("{}.", table);
        for (k, v) in row {
            if k.starts_with(&prefix) {
                out.insert(k.clone(), v.clone());
            }
        }
        return;
    }
    let value = if query.join.is_some() && row.get(&selection.expr).is_none() {
        crate::core::types::path_value_skip_first(row, &selection.expr)
    } else {
        path_value(row, &selection.expr)
    };
    out.insert(selection.alias.clone(), value);
}

// --- order by -----------------------------------------------------------

/// Stable, direction-aware sort by the given column order.
fn order_stage(order_by: &[(String, SortOrder)], rows: &mut [Row]) {
    rows.sort_by(|a, b| {
        for (column, direction) in order_by {
            let ord = path_value(a, column).cmp_order(&path_value(b, column));
            let ord = match direction {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}
