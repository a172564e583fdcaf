use std::fmt;

use chrono::Duration;

use super::value::parse_date;
use super::{RepositoryError, Result, Value};

/// Declared type of an entity field. Drives coercion of raw query values and
/// the inclusive-bound shim on range conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Short,
    Integer,
    Long,
    Float,
    Double,
    Boolean,
    Text,
    Date,
    List,
}

/// Which side of an inclusive bound is being widened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// `ge` bound, moved down.
    Lower,
    /// `le` bound, moved up.
    Upper,
}

impl FieldType {
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Short | Self::Integer | Self::Long)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integral() || matches!(self, Self::Float | Self::Double)
    }

    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date)
    }

    /// Parse a raw (query string) value into this type.
    pub fn coerce_str(&self, raw: &str) -> Result<Value> {
        self.coerce(Value::Text(raw.to_string()))
    }

    pub fn coerce_json(&self, json: &serde_json::Value) -> Result<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        self.coerce(Value::from_json(json))
    }

    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            Self::Short => {
                let v = value.into_i64()?;
                i16::try_from(v)
                    .map(|s| Value::Integer(i64::from(s)))
                    .map_err(|_| RepositoryError::TypeMismatch(format!("{} does not fit a short", v)))
            }
            Self::Integer => {
                let v = value.into_i64()?;
                i32::try_from(v)
                    .map(|s| Value::Integer(i64::from(s)))
                    .map_err(|_| RepositoryError::TypeMismatch(format!("{} does not fit an integer", v)))
            }
            Self::Long => Ok(Value::Integer(value.into_i64()?)),
            Self::Float | Self::Double => Ok(Value::Float(value.into_f64()?)),
            Self::Boolean => Ok(Value::Boolean(value.into_bool()?)),
            Self::Text => Ok(Value::Text(value.into_text()?)),
            Self::Date => {
                let date = match &value {
                    Value::Text(s) => parse_date(s),
                    other => other.as_date(),
                }
                .ok_or_else(|| RepositoryError::TypeMismatch(format!("'{}' is not a date", value)))?;
                let millis = date.timestamp_millis();
                value_from_millis(millis)
            }
            Self::List => match value {
                Value::List(items) => Ok(Value::List(items)),
                other => Ok(Value::List(vec![other])),
            },
        }
    }

    /// Coerce, then widen an inclusive bound so a backend offering only
    /// exclusive `BETWEEN` still includes the bound itself.
    pub fn coerce_with_edge(&self, value: Value, edge: Edge) -> Result<Value> {
        let coerced = self.coerce(value)?;

        let shifted = match (self, &coerced, edge) {
            (t, Value::Integer(i), Edge::Lower) if t.is_integral() => Some(Value::Integer(i - 1)),
            (t, Value::Integer(i), Edge::Upper) if t.is_integral() => Some(Value::Integer(i + 1)),
            (Self::Float | Self::Double, Value::Float(f), Edge::Lower) => Some(Value::Float(f - 0.1)),
            (Self::Float | Self::Double, Value::Float(f), Edge::Upper) => Some(Value::Float(f + 0.1)),
            (Self::Date, Value::Date(d), Edge::Lower) => {
                Some(Value::Date(*d - Duration::milliseconds(1)))
            }
            (Self::Date, Value::Date(d), Edge::Upper) => {
                Some(Value::Date(*d + Duration::milliseconds(1)))
            }
            _ => None,
        };

        Ok(shifted.unwrap_or(coerced))
    }
}

fn value_from_millis(millis: i64) -> Result<Value> {
    Value::Integer(millis)
        .as_date()
        .map(Value::Date)
        .ok_or_else(|| RepositoryError::TypeMismatch(format!("{} is out of date range", millis)))
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Short => "SHORT",
            Self::Integer => "INTEGER",
            Self::Long => "LONG",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Boolean => "BOOLEAN",
            Self::Text => "TEXT",
            Self::Date => "DATE",
            Self::List => "LIST",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion_respects_width() {
        assert_eq!(FieldType::Integer.coerce_str("42").unwrap(), Value::Integer(42));
        assert!(FieldType::Short.coerce_str("70000").is_err());
        assert_eq!(FieldType::Double.coerce_str("1.5").unwrap(), Value::Float(1.5));
        assert_eq!(FieldType::Boolean.coerce_str("1").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_date_accepts_millis_and_iso() {
        let from_millis = FieldType::Date.coerce_str("1700000000000").unwrap();
        let from_iso = FieldType::Date.coerce_str("2023-11-14T22:13:20Z").unwrap();
        assert_eq!(from_millis, from_iso);
        assert_eq!(from_iso.to_string(), "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn test_edge_shim_per_type() {
        let ge = FieldType::Long.coerce_with_edge(Value::from(18), Edge::Lower).unwrap();
        let le = FieldType::Integer.coerce_with_edge(Value::from(65), Edge::Upper).unwrap();
        assert_eq!(ge, Value::Integer(17));
        assert_eq!(le, Value::Integer(66));

        let dge = FieldType::Double.coerce_with_edge(Value::from(1.0), Edge::Lower).unwrap();
        assert!(matches!(dge, Value::Float(f) if (f - 0.9).abs() < 1e-9));

        let date = FieldType::Date
            .coerce_with_edge(Value::from("1700000000000"), Edge::Upper)
            .unwrap();
        assert_eq!(date.as_i64(), Some(1_700_000_000_001));

        let text = FieldType::Text.coerce_with_edge(Value::from("b"), Edge::Lower).unwrap();
        assert_eq!(text, Value::from("b"));
    }
}
