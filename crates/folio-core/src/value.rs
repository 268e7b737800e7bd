//! Cell values produced by datasources.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A typed cell value.
///
/// File-backed sources produce `Text` for every non-empty cell; SQL backends
/// produce the closest typed variant for the column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
}

/// Normalized form of a value used for keyed follower lookups.
///
/// Two values are join-equal when their keys are equal: numbers (and text that
/// parses as a finite number) compare numerically, everything else by its text
/// rendering. `Null` has no key and never joins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinKey(String);

impl JoinKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub fn join_key(&self) -> Option<JoinKey> {
        if self.is_null() {
            return None;
        }
        if let Some(n) = self.as_number() {
            return Some(JoinKey(format!("n:{}", format_number(n))));
        }
        Some(JoinKey(format!("s:{}", self)))
    }

    pub fn join_eq(&self, other: &Value) -> bool {
        match (self.join_key(), other.join_key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Unambiguous typed serialization, used to build cache keys.
    pub fn canonical(&self) -> String {
        match self {
            Value::Null => "z".to_string(),
            Value::Bool(b) => format!("b:{}", b),
            Value::Number(n) => format!("n:{:?}", n),
            Value::Date(d) => format!("d:{}", d),
            Value::DateTime(dt) => format!("dt:{}", dt),
            Value::Text(s) => format!("t{}:{}", s.len(), s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

fn format_number(n: f64) -> String {
    if n == n.floor() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}
