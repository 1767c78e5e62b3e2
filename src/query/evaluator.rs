use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::core::types::{path_value, path_value_skip_first, value_to_key, Row, RowKey, Value};
use crate::query::descriptor::{Condition, Operator, WhereExpr, WhereItem};

/// Pre-computed pk sets for `search(...)` leaves, keyed by [`leaf_key`].
/// The selector runs each search leaf once; the evaluator only consults
/// membership.
pub type SearchSideCache = HashMap<String, HashSet<RowKey>>;

/// Cache key of one search leaf.
pub fn leaf_key(cond: &Condition) -> String {
    format!("{}|{:?}|{}", cond.path, cond.op, cond.value.stringify())
}

/// Evaluates WHERE/HAVING trees against a row.
pub struct Evaluator<'a> {
    pub pk_column: &'a str,
    /// Resolve paths with the leading table segment dropped when the
    /// literal joined key is absent.
    pub ignore_first_path: bool,
    pub search_cache: Option<&'a SearchSideCache>,
}

impl<'a> Evaluator<'a> {
    pub fn new(pk_column: &'a str) -> Self {
        Evaluator {
            pk_column,
            ignore_first_path: false,
            search_cache: None,
        }
    }

    pub fn with_search_cache(mut self, cache: &'a SearchSideCache) -> Self {
        self.search_cache = Some(cache);
        self
    }

    pub fn matches(&self, expr: &WhereExpr, row: &Row) -> bool {
        match expr {
            WhereExpr::Leaf(cond) => self.leaf(cond, row),
            WhereExpr::List(items) => self.list(items, row),
        }
    }

    /// A connective list evaluates left-to-right without precedence. With
    /// no OR present ANDs short-circuit on the first false; once any OR
    /// appears every leaf is evaluated and the results folded in order.
    fn list(&self, items: &[WhereItem], row: &Row) -> bool {
        let has_or = items.iter().any(|i| matches!(i, WhereItem::Or));

        if !has_or {
            for item in items {
                if let WhereItem::Cond(cond) = item {
                    if !self.leaf(cond, row) {
                        return false;
                    }
                }
            }
            return true;
        }

        let mut result: Option<bool> = None;
        let mut pending_or = false;
        for item in items {
            match item {
                WhereItem::And => pending_or = false,
                WhereItem::Or => pending_or = true,
                WhereItem::Cond(cond) => {
                    let value = self.leaf(cond, row);
                    result = Some(match result {
                        None => value,
                        Some(prev) if pending_or => prev || value,
                        Some(prev) => prev && value,
                    });
                }
            }
        }
        result.unwrap_or(true)
    }

    fn leaf(&self, cond: &Condition, row: &Row) -> bool {
        if cond.path.starts_with("search(") {
            return self.search_leaf(cond, row);
        }

        let left = if self.ignore_first_path && row.get(&cond.path).is_none() {
            path_value_skip_first(row, &cond.path)
        } else {
            path_value(row, &cond.path)
        };

        // NULL / NOT NULL sentinels ride on = and LIKE
        if let Value::String(sentinel) = &cond.value {
            if matches!(cond.op, Operator::Eq | Operator::Like) {
                match sentinel.as_str() {
                    "NULL" => return left.is_null(),
                    "NOT NULL" => return !left.is_null(),
                    _ => {}
                }
            }
        }

        compare_values(cond.op, &left, &cond.value)
    }

    fn search_leaf(&self, cond: &Condition, row: &Row) -> bool {
        let Some(cache) = self.search_cache else {
            return false;
        };
        let Some(set) = cache.get(&leaf_key(cond)) else {
            return false;
        };
        let Some(pk) = row.get(self.pk_column).and_then(value_to_key) else {
            return false;
        };
        set.contains(&pk)
    }
}

/// Apply one relational operator. Also used directly by the join stage,
/// where both sides resolve from the joined row.
pub fn compare_values(op: Operator, left: &Value, right: &Value) -> bool {
    match op {
        Operator::Eq => values_equal(left, right),
        Operator::Ne => !values_equal(left, right),
        Operator::Lt => cmp_is(left, right, &[Ordering::Less]),
        Operator::Le => cmp_is(left, right, &[Ordering::Less, Ordering::Equal]),
        Operator::Gt => cmp_is(left, right, &[Ordering::Greater]),
        Operator::Ge => cmp_is(left, right, &[Ordering::Greater, Ordering::Equal]),
        Operator::In => in_list(left, right),
        Operator::NotIn => !in_list(left, right),
        Operator::Regex => regex_match(left, right),
        Operator::Like => like_match(left, right),
        Operator::NotLike => !like_match(left, right),
        Operator::Between => between(left, right),
        Operator::Have => have(left, right),
        Operator::NotHave => !have(left, right),
        Operator::Intersect => intersect(left, right),
        Operator::NotIntersect => !intersect(left, right),
    }
}

/// Element-wise equality with number/string coercion at the scalar level.
fn values_equal(left: &Value, right: &Value) -> bool {
    left == right || left.loose_cmp(right) == Some(Ordering::Equal)
}

fn cmp_is(left: &Value, right: &Value, accept: &[Ordering]) -> bool {
    left.loose_cmp(right)
        .map(|ord| accept.contains(&ord))
        .unwrap_or(false)
}

fn in_list(left: &Value, right: &Value) -> bool {
    right
        .as_array()
        .map(|items| items.iter().any(|item| values_equal(left, item)))
        .unwrap_or(false)
}

fn regex_match(left: &Value, right: &Value) -> bool {
    let (Some(text), Some(pattern)) = (left.as_str(), right.as_str()) else {
        return false;
    };
    Regex::new(pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Case-insensitive substring; `%` in the pattern acts as a multi-char
/// wildcard over the whole value.
fn like_match(left: &Value, right: &Value) -> bool {
    let Some(pattern) = right.as_str() else {
        return false;
    };
    let text = match left {
        Value::String(s) => s.to_lowercase(),
        Value::Null => return false,
        other => other.stringify().to_lowercase(),
    };
    let pattern = pattern.to_lowercase();

    if pattern.contains('%') {
        let anchored = format!(
            "^{}$",
            pattern
                .split('%')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*")
        );
        return Regex::new(&anchored)
            .map(|re| re.is_match(&text))
            .unwrap_or(false);
    }
    text.contains(&pattern)
}

fn between(left: &Value, right: &Value) -> bool {
    let Some(bounds) = right.as_array() else {
        return false;
    };
    if bounds.len() != 2 {
        return false;
    }
    cmp_is(left, &bounds[0], &[Ordering::Greater, Ordering::Equal])
        && cmp_is(left, &bounds[1], &[Ordering::Less, Ordering::Equal])
}

fn have(left: &Value, right: &Value) -> bool {
    left.as_array()
        .map(|items| items.iter().any(|item| values_equal(item, right)))
        .unwrap_or(false)
}

fn intersect(left: &Value, right: &Value) -> bool {
    match (left.as_array(), right.as_array()) {
        (Some(a), Some(b)) => a.iter().any(|x| b.iter().any(|y| values_equal(x, y))),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn sample() -> Row {
        row(&[
            ("id", Value::Number(1.0)),
            ("name", Value::String("Billy Backpack".to_string())),
            ("age", Value::Number(30.0)),
            (
                "tags",
                Value::Array(vec![
                    Value::String("a".to_string()),
                    Value::String("b".to_string()),
                ]),
            ),
            ("nick", Value::Null),
        ])
    }

    fn eval(cond: Condition) -> bool {
        Evaluator::new("id").matches(&WhereExpr::Leaf(cond), &sample())
    }

    #[test]
    fn relational_operators() {
        assert!(eval(Condition::new("age", Operator::Eq, Value::Number(30.0))));
        assert!(eval(Condition::new("age", Operator::Ne, Value::Number(31.0))));
        assert!(eval(Condition::new("age", Operator::Gt, Value::Number(29.0))));
        assert!(eval(Condition::new("age", Operator::Le, Value::Number(30.0))));
        assert!(eval(Condition::new(
            "age",
            Operator::Between,
            Value::Array(vec![Value::Number(25.0), Value::Number(35.0)])
        )));
        assert!(!eval(Condition::new(
            "age",
            Operator::Between,
            Value::Array(vec![Value::Number(31.0), Value::Number(35.0)])
        )));
    }

    #[test]
    fn like_is_case_insensitive_substring() {
        assert!(eval(Condition::new(
            "name",
            Operator::Like,
            Value::String("backpack".to_string())
        )));
        assert!(eval(Condition::new(
            "name",
            Operator::Like,
            Value::String("billy%".to_string())
        )));
        assert!(!eval(Condition::new(
            "name",
            Operator::Like,
            Value::String("%pack".to_string())
        )));
        assert!(eval(Condition::new(
            "name",
            Operator::NotLike,
            Value::String("suitcase".to_string())
        )));
    }

    #[test]
    fn null_sentinels() {
        assert!(eval(Condition::new(
            "nick",
            Operator::Eq,
            Value::String("NULL".to_string())
        )));
        assert!(eval(Condition::new(
            "name",
            Operator::Like,
            Value::String("NOT NULL".to_string())
        )));
        // missing columns read as null too
        assert!(eval(Condition::new(
            "missing",
            Operator::Eq,
            Value::String("NULL".to_string())
        )));
    }

    #[test]
    fn array_operators() {
        assert!(eval(Condition::new(
            "tags",
            Operator::Have,
            Value::String("a".to_string())
        )));
        assert!(eval(Condition::new(
            "tags",
            Operator::Intersect,
            Value::Array(vec![Value::String("b".to_string()), Value::String("z".to_string())])
        )));
        assert!(eval(Condition::new(
            "tags",
            Operator::NotIntersect,
            Value::Array(vec![Value::String("x".to_string())])
        )));
        assert!(eval(Condition::new(
            "tags.length",
            Operator::Eq,
            Value::Number(2.0)
        )));
    }

    #[test]
    fn in_and_regex() {
        assert!(eval(Condition::new(
            "age",
            Operator::In,
            Value::Array(vec![Value::Number(29.0), Value::Number(30.0)])
        )));
        assert!(eval(Condition::new(
            "name",
            Operator::Regex,
            Value::String("^Billy".to_string())
        )));
    }

    #[test]
    fn and_list_short_circuits() {
        let expr = WhereExpr::List(vec![
            WhereItem::Cond(Condition::new("age", Operator::Eq, Value::Number(30.0))),
            WhereItem::And,
            WhereItem::Cond(Condition::new(
                "name",
                Operator::Like,
                Value::String("billy".to_string()),
            )),
        ]);
        assert!(Evaluator::new("id").matches(&expr, &sample()));
    }

    #[test]
    fn or_list_is_fully_evaluated_left_to_right() {
        // false AND true OR true => (false && true) || true => true
        let expr = WhereExpr::List(vec![
            WhereItem::Cond(Condition::new("age", Operator::Eq, Value::Number(99.0))),
            WhereItem::And,
            WhereItem::Cond(Condition::new("age", Operator::Eq, Value::Number(30.0))),
            WhereItem::Or,
            WhereItem::Cond(Condition::new(
                "name",
                Operator::Like,
                Value::String("billy".to_string()),
            )),
        ]);
        assert!(Evaluator::new("id").matches(&expr, &sample()));

        // true OR false AND false => (true || false) && false => false
        let expr = WhereExpr::List(vec![
            WhereItem::Cond(Condition::new("age", Operator::Eq, Value::Number(30.0))),
            WhereItem::Or,
            WhereItem::Cond(Condition::new("age", Operator::Eq, Value::Number(99.0))),
            WhereItem::And,
            WhereItem::Cond(Condition::new("age", Operator::Eq, Value::Number(98.0))),
        ]);
        assert!(!Evaluator::new("id").matches(&expr, &sample()));
    }

    #[test]
    fn search_leaf_uses_side_cache() {
        let cond = Condition::new("search(body)", Operator::Eq, Value::String("fox".to_string()));
        let mut cache = SearchSideCache::new();
        cache.insert(leaf_key(&cond), HashSet::from([RowKey::Int(1)]));

        let evaluator = Evaluator::new("id").with_search_cache(&cache);
        assert!(evaluator.matches(&WhereExpr::Leaf(cond.clone()), &sample()));

        let mut other = sample();
        other.insert("id".to_string(), Value::Number(2.0));
        assert!(!evaluator.matches(&WhereExpr::Leaf(cond), &other));
    }
}
