use std::collections::HashMap;

use crate::core::error::{Error, Result};
use crate::core::types::{path_value, Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    /// Collapses a row set (or group bucket) to one value.
    Aggregate,
    /// One value per row.
    Scalar,
}

type ScalarFn = Box<dyn Fn(&Row, &[String]) -> Result<Value> + Send + Sync>;
type AggregateFn = Box<dyn Fn(&[Row], &[String]) -> Result<Value> + Send + Sync>;

enum FnImpl {
    Scalar(ScalarFn),
    Aggregate(AggregateFn),
}

pub struct DbFunction {
    pub name: String,
    pub kind: FnKind,
    call: FnImpl,
}

impl DbFunction {
    pub fn call_scalar(&self, row: &Row, args: &[String]) -> Result<Value> {
        match &self.call {
            FnImpl::Scalar(f) => f(row, args),
            FnImpl::Aggregate(f) => f(std::slice::from_ref(row), args),
        }
    }

    pub fn call_aggregate(&self, rows: &[Row], args: &[String]) -> Result<Value> {
        match &self.call {
            FnImpl::Aggregate(f) => f(rows, args),
            FnImpl::Scalar(_) => Err(Error::schema(format!(
                "'{}' is a scalar function, not an aggregate",
                self.name
            ))),
        }
    }
}

/// Registered query functions, looked up by the projection stage when a
/// selection expression reads `FN(args) AS alias`. Ships with the SQL-ish
/// builtins; callers may register their own.
pub struct FunctionRegistry {
    functions: HashMap<String, DbFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry {
            functions: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = FunctionRegistry::new();
        registry.register_builtins();
        registry
    }

    pub fn register_scalar<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&Row, &[String]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.insert(
            name.to_uppercase(),
            DbFunction {
                name: name.to_uppercase(),
                kind: FnKind::Scalar,
                call: FnImpl::Scalar(Box::new(f)),
            },
        );
    }

    pub fn register_aggregate<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Row], &[String]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.insert(
            name.to_uppercase(),
            DbFunction {
                name: name.to_uppercase(),
                kind: FnKind::Aggregate,
                call: FnImpl::Aggregate(Box::new(f)),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&DbFunction> {
        self.functions.get(&name.to_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_uppercase())
    }

    fn register_builtins(&mut self) {
        self.register_aggregate("COUNT", |rows, args| {
            let n = match args.first().map(String::as_str) {
                Some("*") | None => rows.len(),
                Some(path) => rows
                    .iter()
                    .filter(|row| !path_value(row, path).is_null())
                    .count(),
            };
            Ok(Value::Number(n as f64))
        });
        self.register_aggregate("SUM", |rows, args| {
            Ok(Value::Number(numbers_of(rows, args).iter().sum()))
        });
        self.register_aggregate("AVG", |rows, args| {
            let values = numbers_of(rows, args);
            if values.is_empty() {
                return Ok(Value::Null);
            }
            Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
        });
        self.register_aggregate("MIN", |rows, args| {
            Ok(numbers_of(rows, args)
                .into_iter()
                .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.min(v))))
                .map(Value::Number)
                .unwrap_or(Value::Null))
        });
        self.register_aggregate("MAX", |rows, args| {
            Ok(numbers_of(rows, args)
                .into_iter()
                .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
                .map(Value::Number)
                .unwrap_or(Value::Null))
        });
        // LEAST/GREATEST order any value type, not just numbers
        self.register_aggregate("LEAST", |rows, args| {
            Ok(values_of(rows, args)
                .into_iter()
                .min_by(|a, b| a.cmp_order(b))
                .unwrap_or(Value::Null))
        });
        self.register_aggregate("GREATEST", |rows, args| {
            Ok(values_of(rows, args)
                .into_iter()
                .max_by(|a, b| a.cmp_order(b))
                .unwrap_or(Value::Null))
        });

        self.register_scalar("UPPER", |row, args| {
            Ok(string_arg(row, args).map(|s| Value::String(s.to_uppercase())).unwrap_or(Value::Null))
        });
        self.register_scalar("LOWER", |row, args| {
            Ok(string_arg(row, args).map(|s| Value::String(s.to_lowercase())).unwrap_or(Value::Null))
        });
        self.register_scalar("TRIM", |row, args| {
            Ok(string_arg(row, args)
                .map(|s| Value::String(s.trim().to_string()))
                .unwrap_or(Value::Null))
        });
        self.register_scalar("LENGTH", |row, args| {
            let value = args
                .first()
                .map(|a| resolve_arg(row, a))
                .unwrap_or(Value::Null);
            Ok(match value {
                Value::String(s) => Value::Number(s.chars().count() as f64),
                Value::Array(items) => Value::Number(items.len() as f64),
                _ => Value::Null,
            })
        });
        self.register_scalar("CONCAT", |row, args| {
            let mut out = String::new();
            for arg in args {
                out.push_str(&resolve_arg(row, arg).stringify());
            }
            Ok(Value::String(out))
        });
        self.register_scalar("ROUND", |row, args| {
            let value = args
                .first()
                .map(|a| resolve_arg(row, a))
                .and_then(|v| v.as_f64());
            let places = args
                .get(1)
                .and_then(|a| a.parse::<i32>().ok())
                .unwrap_or(0);
            Ok(value
                .map(|v| {
                    let factor = 10f64.powi(places);
                    Value::Number((v * factor).round() / factor)
                })
                .unwrap_or(Value::Null))
        });
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Function arguments are raw strings: a dotted path when the row resolves
/// it, otherwise a numeric or bare string literal.
pub fn resolve_arg(row: &Row, arg: &str) -> Value {
    let from_row = path_value(row, arg);
    if !from_row.is_null() {
        return from_row;
    }
    if let Ok(n) = arg.parse::<f64>() {
        return Value::Number(n);
    }
    if arg.is_empty() {
        Value::Null
    } else {
        Value::String(arg.to_string())
    }
}

fn values_of(rows: &[Row], args: &[String]) -> Vec<Value> {
    let Some(path) = args.first() else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| path_value(row, path))
        .filter(|v| !v.is_null())
        .collect()
}

fn numbers_of(rows: &[Row], args: &[String]) -> Vec<f64> {
    values_of(rows, args)
        .iter()
        .filter_map(Value::as_f64)
        .collect()
}

fn string_arg(row: &Row, args: &[String]) -> Option<String> {
    args.first().map(|a| match resolve_arg(row, a) {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.stringify(),
    })
}
