use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::core::{RepositoryError, Result};

/// Canonical date rendering: ISO-8601, UTC, millisecond precision.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(DateTime<Utc>),
    List(Vec<Value>),
}

impl Value {
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            // Missing attributes sort first
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),

            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),

            // Integer and Float fields share one numeric order
            (Value::Integer(a), Value::Float(b)) => Ok((*a as f64).total_cmp(b)),
            (Value::Float(a), Value::Integer(b)) => Ok(a.total_cmp(&(*b as f64))),

            // Dates arriving as text (page tokens, raw payloads)
            (Value::Date(a), Value::Text(b)) => match parse_date(b) {
                Some(b) => Ok(a.cmp(&b)),
                None => Err(Self::incomparable(self, other)),
            },
            (Value::Text(a), Value::Date(b)) => match parse_date(a) {
                Some(a) => Ok(a.cmp(b)),
                None => Err(Self::incomparable(self, other)),
            },

            (Value::List(a), Value::List(b)) => {
                for (left, right) in a.iter().zip(b.iter()) {
                    let ord = left.compare(right)?;
                    if ord != Ordering::Equal {
                        return Ok(ord);
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }

            _ => Err(Self::incomparable(self, other)),
        }
    }

    fn incomparable(a: &Value, b: &Value) -> RepositoryError {
        RepositoryError::TypeMismatch(format!(
            "Cannot compare incompatible types: {} and {}",
            a.type_name(),
            b.type_name()
        ))
    }

    /// Total order used for in-memory sorting: comparable values by
    /// `compare`, otherwise by type rank.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|_| self.type_rank().cmp(&other.type_rank()))
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) | Self::Float(_) => 2,
            Self::Date(_) => 3,
            Self::Text(_) => 4,
            Self::List(_) => 5,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Date(_) => "DATE",
            Self::List(_) => "LIST",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            Self::Date(d) => Some(d.timestamp_millis()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            Self::Text(s) => parse_date(s),
            Self::Integer(ms) => Utc.timestamp_millis_opt(*ms).single(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Null => Err(RepositoryError::TypeMismatch("expected TEXT, got NULL".into())),
            other => Ok(other.to_string()),
        }
    }

    pub fn into_i64(self) -> Result<i64> {
        match &self {
            Self::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| RepositoryError::TypeMismatch(format!("'{}' is not an integer", s))),
            other => other.as_i64().ok_or_else(|| {
                RepositoryError::TypeMismatch(format!("expected INTEGER, got {}", other.type_name()))
            }),
        }
    }

    pub fn into_f64(self) -> Result<f64> {
        match &self {
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| RepositoryError::TypeMismatch(format!("'{}' is not a number", s))),
            other => other.as_f64().ok_or_else(|| {
                RepositoryError::TypeMismatch(format!("expected FLOAT, got {}", other.type_name()))
            }),
        }
    }

    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Boolean(b) => Ok(b),
            Self::Integer(i) => Ok(i != 0),
            Self::Text(s) if s.eq_ignore_ascii_case("true") || s == "1" => Ok(true),
            Self::Text(s) if s.eq_ignore_ascii_case("false") || s == "0" => Ok(false),
            other => Err(RepositoryError::TypeMismatch(format!(
                "expected BOOLEAN, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn into_date(self) -> Result<DateTime<Utc>> {
        self.as_date().ok_or_else(|| {
            RepositoryError::TypeMismatch(format!("'{}' is not a date", self))
        })
    }

    pub fn into_list(self) -> Result<Vec<Value>> {
        match self {
            Self::List(items) => Ok(items),
            Self::Null => Ok(Vec::new()),
            other => Err(RepositoryError::TypeMismatch(format!(
                "expected LIST, got {}",
                other.type_name()
            ))),
        }
    }

    /// `contains` semantics of the store: substring for text, membership for
    /// lists.
    pub fn contains(&self, needle: &Value) -> bool {
        match (self, needle) {
            (Self::Text(haystack), Self::Text(n)) => haystack.contains(n.as_str()),
            (Self::Text(haystack), other) => haystack.contains(&other.to_string()),
            (Self::List(items), n) => items.iter().any(|item| item == n),
            _ => false,
        }
    }

    pub fn begins_with(&self, prefix: &Value) -> bool {
        match (self, prefix) {
            (Self::Text(s), Self::Text(p)) => s.starts_with(p.as_str()),
            (Self::Date(_), Self::Text(p)) => self.to_string().starts_with(p.as_str()),
            _ => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Date(d) => serde_json::Value::String(format_date(d)),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Untyped conversion; dates stay text until coerced through a field type.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(_) => Self::Text(json.to_string()),
        }
    }
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Accepts epoch millis, RFC 3339, or the canonical format without a zone.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(millis) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(millis).single();
    }

    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }

    if let Ok(date) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(date.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                if a.is_nan() && b.is_nan() {
                    return true;
                }
                (a - b).abs() < f64::EPSILON
            }
            (Self::Integer(i), Self::Float(f)) | (Self::Float(f), Self::Integer(i)) => {
                (*i as f64 - f).abs() < f64::EPSILON
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Date(d), Self::Text(s)) | (Self::Text(s), Self::Date(d)) => {
                parse_date(s).is_some_and(|parsed| parsed == *d)
            }
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Date(d) => write!(f, "{}", format_date(d)),
            Self::List(items) => {
                let rendered = items.iter().map(Value::to_string).collect::<Vec<_>>();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert_eq!(Value::Integer(42), Value::Integer(42));
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_ne!(Value::Integer(1), Value::Integer(2));
    }

    #[test]
    fn test_null_sorts_first_and_text_is_incomparable_with_numbers() {
        assert!(Value::Integer(1) < Value::Integer(2));
        assert!(Value::Text("a".into()) < Value::Text("b".into()));
        assert!(Value::Null < Value::Integer(0));
        assert_eq!(Value::Text("x".into()).partial_cmp(&Value::Integer(1)), None);
    }

    #[test]
    fn test_dates_render_canonically_and_compare_with_text() {
        let date = parse_date("1700000000123").unwrap();
        let value = Value::Date(date);
        assert_eq!(value.to_string(), "2023-11-14T22:13:20.123Z");
        assert_eq!(value, Value::Text("2023-11-14T22:13:20.123Z".into()));
        assert_eq!(
            value.compare(&Value::Text("2023-11-14T22:13:20.124+00:00".into())).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_contains_and_begins_with() {
        let text = Value::from("norway");
        assert!(text.contains(&Value::from("orw")));
        assert!(text.begins_with(&Value::from("nor")));

        let tags = Value::from(vec!["a", "b"]);
        assert!(tags.contains(&Value::from("b")));
        assert!(!tags.contains(&Value::from("c")));
    }

    #[test]
    fn test_into_conversions() {
        assert_eq!(Value::from("17").into_i64().unwrap(), 17);
        assert!(Value::from("x").into_i64().is_err());
        assert!(Value::from("TRUE").into_bool().unwrap());
        assert!(Value::Null.into_text().is_err());
    }
}
