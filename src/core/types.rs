use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Semi-structured cell value. Rows are maps of these; adapters never see
/// anything more strongly typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

pub type Row = BTreeMap<String, Value>;

/// Primary key of a stored row. Numeric-pk tables support range arithmetic,
/// string-pk tables get uuid assignment from the adapter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowKey {
    Int(i64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Canonical text form, used for index keys and group-by bucket keys.
    pub fn stringify(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.stringify()).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Object(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v.stringify()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }

    /// Total ordering for ORDER BY / GROUP BY sorting. Variants rank
    /// Null < Bool < Number < String < Array < Object.
    pub fn cmp_order(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Number(_) => 2,
                Value::String(_) => 3,
                Value::Array(_) => 4,
                Value::Object(_) => 5,
            }
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.cmp_order(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => rank(self).cmp(&rank(other)),
        }
    }

    /// Comparison for the relational operators. Numbers compare numerically,
    /// strings lexically; a string facing a number is parsed first.
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::String(s)) => {
                s.parse::<f64>().ok().and_then(|b| a.partial_cmp(&b))
            }
            (Value::String(s), Value::Number(b)) => {
                s.parse::<f64>().ok().and_then(|a| a.partial_cmp(b))
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl RowKey {
    pub fn to_value(&self) -> Value {
        match self {
            RowKey::Int(i) => Value::Number(*i as f64),
            RowKey::Str(s) => Value::String(s.clone()),
        }
    }
}

/// Convert a cell value to a storable key. Non-scalar values key by their
/// canonical text form.
pub fn value_to_key(value: &Value) -> Option<RowKey> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(RowKey::Int(*n as i64)),
        Value::String(s) => Some(RowKey::Str(s.clone())),
        other => Some(RowKey::Str(other.stringify())),
    }
}

/// Resolve a dotted path against a row, e.g. `address.city` or
/// `tags.length`. Joined rows carry literal `table.column` keys, so the
/// whole path is tried as a key before being split on dots.
pub fn path_value(row: &Row, path: &str) -> Value {
    if let Some(v) = row.get(path) {
        return v.clone();
    }
    let segments: Vec<&str> = path.split('.').collect();
    resolve_segments(row, &segments)
}

/// Same as [`path_value`] but drops the leading segment first. Used when
/// joined rows are addressed without their table prefix.
pub fn path_value_skip_first(row: &Row, path: &str) -> Value {
    if let Some(v) = row.get(path) {
        return v.clone();
    }
    let segments: Vec<&str> = path.split('.').skip(1).collect();
    if segments.is_empty() {
        return Value::Null;
    }
    resolve_segments(row, &segments)
}

fn resolve_segments(row: &Row, segments: &[&str]) -> Value {
    let mut current = match row.get(segments[0]) {
        Some(v) => v.clone(),
        None => return Value::Null,
    };

    for segment in &segments[1..] {
        if *segment == "length" {
            return match &current {
                Value::Array(items) => Value::Number(items.len() as f64),
                Value::String(s) => Value::Number(s.chars().count() as f64),
                _ => Value::Null,
            };
        }
        current = match &current {
            Value::Object(map) => map.get(*segment).cloned().unwrap_or(Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}

/// Shallow merge of `patch` into a copy of `base`. Adapters may hand out
/// frozen rows, so mutation always starts from a copy.
pub fn merge_rows(base: &Row, patch: &Row) -> Row {
    let mut merged = base.clone();
    for (k, v) in patch {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn dotted_path_resolution() {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), Value::String("Oslo".to_string()));
        let r = row(&[
            ("name", Value::String("Ada".to_string())),
            ("address", Value::Object(address)),
        ]);

        assert_eq!(path_value(&r, "address.city"), Value::String("Oslo".to_string()));
        assert_eq!(path_value(&r, "address.zip"), Value::Null);
        assert_eq!(path_value(&r, "missing"), Value::Null);
    }

    #[test]
    fn length_suffix() {
        let r = row(&[(
            "tags",
            Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]),
        )]);
        assert_eq!(path_value(&r, "tags.length"), Value::Number(2.0));
    }

    #[test]
    fn literal_key_wins_over_dotted_walk() {
        let r = row(&[("users.name", Value::String("Grace".to_string()))]);
        assert_eq!(path_value(&r, "users.name"), Value::String("Grace".to_string()));
        assert_eq!(
            path_value_skip_first(&r, "users.name"),
            Value::String("Grace".to_string())
        );
    }

    #[test]
    fn loose_comparison_coerces_strings() {
        assert_eq!(
            Value::Number(10.0).loose_cmp(&Value::String("9".to_string())),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::String("a".to_string()).loose_cmp(&Value::String("b".to_string())),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Null.loose_cmp(&Value::Number(1.0)), None);
    }

    #[test]
    fn number_keys_are_integers() {
        assert_eq!(value_to_key(&Value::Number(5.0)), Some(RowKey::Int(5)));
        assert_eq!(
            value_to_key(&Value::String("x".to_string())),
            Some(RowKey::Str("x".to_string()))
        );
        assert_eq!(value_to_key(&Value::Null), None);
    }
}
