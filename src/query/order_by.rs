use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("asc") {
            Some(Self::Asc)
        } else if raw.eq_ignore_ascii_case("desc") {
            Some(Self::Desc)
        } else {
            None
        }
    }

    pub fn is_asc(&self) -> bool {
        matches!(self, Self::Asc)
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

/// Ordering request; always served through a single secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByParameter {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default, deserialize_with = "lenient_direction")]
    pub direction: SortDirection,
}

impl OrderByParameter {
    pub fn new(field: &str, direction: SortDirection) -> Self {
        Self {
            field: Some(field.to_string()),
            direction,
        }
    }

    pub fn asc(field: &str) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: &str) -> Self {
        Self::new(field, SortDirection::Desc)
    }

    pub fn is_valid(&self) -> bool {
        self.field.as_deref().is_some_and(|f| !f.is_empty())
    }

    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or_default()
    }

    pub fn is_asc(&self) -> bool {
        self.direction.is_asc()
    }
}

// Unknown directions fall back to the default rather than failing the request.
fn lenient_direction<'de, D>(deserializer: D) -> Result<SortDirection, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .and_then(SortDirection::parse)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_defaults_to_desc() {
        let parsed: OrderByParameter = serde_json::from_str(r#"{"field":"age"}"#).unwrap();
        assert_eq!(parsed.direction, SortDirection::Desc);
        assert!(parsed.is_valid());

        let asc: OrderByParameter =
            serde_json::from_str(r#"{"field":"age","direction":"ASC"}"#).unwrap();
        assert!(asc.is_asc());
    }

    #[test]
    fn test_missing_field_is_invalid() {
        let parsed: OrderByParameter = serde_json::from_str(r#"{"direction":"asc"}"#).unwrap();
        assert!(!parsed.is_valid());
    }
}
