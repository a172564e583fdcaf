use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::expression::FilterType;
use crate::core::{RepositoryError, Result};

/// The single operator a filter applies. Two-sided variants carry both
/// bounds so "exactly one operator" holds by construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Eq(JsonValue),
    Ne(JsonValue),
    Gt(JsonValue),
    Lt(JsonValue),
    Ge(JsonValue),
    Le(JsonValue),
    /// `gt` + `lt`
    Between { gt: JsonValue, lt: JsonValue },
    /// `ge` + `le`
    InclusiveBetween { ge: JsonValue, le: JsonValue },
    /// `ge` + `lt`
    GeLtBetween { ge: JsonValue, lt: JsonValue },
    /// `le` + `gt`
    LeGtBetween { gt: JsonValue, le: JsonValue },
    Contains(JsonValue),
    NotContains(JsonValue),
    BeginsWith(JsonValue),
    In(Vec<JsonValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterParameter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(rename = "type")]
    pub kind: FilterType,
}

/// Wire shape of one filter object on the query surface.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFilterParameter {
    pub field: Option<String>,
    pub eq: Option<JsonValue>,
    pub ne: Option<JsonValue>,
    pub gt: Option<JsonValue>,
    pub lt: Option<JsonValue>,
    pub ge: Option<JsonValue>,
    pub le: Option<JsonValue>,
    pub contains: Option<JsonValue>,
    pub not_contains: Option<JsonValue>,
    pub begins_with: Option<JsonValue>,
    #[serde(rename = "in")]
    pub in_values: Option<Vec<JsonValue>>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl RawFilterParameter {
    /// Classify into exactly one operator, or the validation message keyed
    /// by `<field>_error`.
    pub fn into_parameter(self, field: &str) -> std::result::Result<FilterParameter, (String, String)> {
        let error_key = format!("{}_error", field);

        let kind = match self.kind.as_deref() {
            None => FilterType::And,
            Some(t) if t.eq_ignore_ascii_case("and") => FilterType::And,
            Some(t) if t.eq_ignore_ascii_case("or") => FilterType::Or,
            Some(t) => {
                return Err((error_key, format!("Type '{}' is not valid, use AND or OR!", t)));
            }
        };

        let RawFilterParameter {
            eq,
            ne,
            gt,
            lt,
            ge,
            le,
            contains,
            not_contains,
            begins_with,
            in_values,
            ..
        } = self;

        let operator = match (eq, ne, gt, lt, ge, le, contains, not_contains, begins_with, in_values) {
            (Some(v), None, None, None, None, None, None, None, None, None) => FilterOperator::Eq(v),
            (None, Some(v), None, None, None, None, None, None, None, None) => FilterOperator::Ne(v),
            (None, None, Some(v), None, None, None, None, None, None, None) => FilterOperator::Gt(v),
            (None, None, None, Some(v), None, None, None, None, None, None) => FilterOperator::Lt(v),
            (None, None, None, None, Some(v), None, None, None, None, None) => FilterOperator::Ge(v),
            (None, None, None, None, None, Some(v), None, None, None, None) => FilterOperator::Le(v),
            (None, None, Some(gt), Some(lt), None, None, None, None, None, None) => {
                FilterOperator::Between { gt, lt }
            }
            (None, None, None, None, Some(ge), Some(le), None, None, None, None) => {
                FilterOperator::InclusiveBetween { ge, le }
            }
            (None, None, None, Some(lt), Some(ge), None, None, None, None, None) => {
                FilterOperator::GeLtBetween { ge, lt }
            }
            (None, None, Some(gt), None, None, Some(le), None, None, None, None) => {
                FilterOperator::LeGtBetween { gt, le }
            }
            (None, None, None, None, None, None, Some(v), None, None, None) => FilterOperator::Contains(v),
            (None, None, None, None, None, None, None, Some(v), None, None) => {
                FilterOperator::NotContains(v)
            }
            (None, None, None, None, None, None, None, None, Some(v), None) => {
                FilterOperator::BeginsWith(v)
            }
            (None, None, None, None, None, None, None, None, None, Some(values)) if !values.is_empty() => {
                FilterOperator::In(values)
            }
            (eq, ne, gt, lt, ge, le, ..) => {
                let simple = eq.is_some() || ne.is_some();
                let ranged = gt.is_some() || lt.is_some() || ge.is_some() || le.is_some();
                let message = if simple && ranged {
                    format!(
                        "Filter Parameter error on: '{}', 'eq' or 'ne' cannot co exist with 'gt','lt','ge' or 'le' parameters!",
                        field
                    )
                } else {
                    "Advanced functions cannot be used in conjunction with simple functions.".to_string()
                };
                return Err((error_key, message));
            }
        };

        Ok(FilterParameter {
            field: field.to_string(),
            operator,
            kind,
        })
    }
}

impl FilterParameter {
    pub fn builder(field: &str) -> FilterParameterBuilder {
        FilterParameterBuilder {
            field: field.to_string(),
            raw: RawFilterParameter::default(),
        }
    }

    pub fn is_eq(&self) -> bool {
        matches!(self.operator, FilterOperator::Eq(_))
    }

    pub fn is_in(&self) -> bool {
        matches!(self.operator, FilterOperator::In(_))
    }

    pub fn is_contains(&self) -> bool {
        matches!(self.operator, FilterOperator::Contains(_))
    }

    pub fn is_not_contains(&self) -> bool {
        matches!(self.operator, FilterOperator::NotContains(_))
    }

    /// Operators a range-key condition cannot express.
    pub fn is_illegal_ranged_key_param(&self) -> bool {
        self.is_contains() || self.is_not_contains() || self.is_in()
    }

    /// Single-sided bound usable in a paired range-key condition.
    pub fn single_bound(&self) -> Option<(BoundKind, &JsonValue)> {
        match &self.operator {
            FilterOperator::Gt(v) => Some((BoundKind::Gt, v)),
            FilterOperator::Lt(v) => Some((BoundKind::Lt, v)),
            FilterOperator::Ge(v) => Some((BoundKind::Ge, v)),
            FilterOperator::Le(v) => Some((BoundKind::Le, v)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    Gt,
    Lt,
    Ge,
    Le,
}

impl BoundKind {
    pub fn is_lower(&self) -> bool {
        matches!(self, Self::Gt | Self::Ge)
    }
}

pub struct FilterParameterBuilder {
    field: String,
    raw: RawFilterParameter,
}

impl FilterParameterBuilder {
    pub fn with_eq(mut self, value: impl Into<JsonValue>) -> Self {
        self.raw.eq = Some(value.into());
        self
    }

    pub fn with_ne(mut self, value: impl Into<JsonValue>) -> Self {
        self.raw.ne = Some(value.into());
        self
    }

    pub fn with_gt(mut self, value: impl Into<JsonValue>) -> Self {
        self.raw.gt = Some(value.into());
        self
    }

    pub fn with_lt(mut self, value: impl Into<JsonValue>) -> Self {
        self.raw.lt = Some(value.into());
        self
    }

    pub fn with_ge(mut self, value: impl Into<JsonValue>) -> Self {
        self.raw.ge = Some(value.into());
        self
    }

    pub fn with_le(mut self, value: impl Into<JsonValue>) -> Self {
        self.raw.le = Some(value.into());
        self
    }

    pub fn with_between(self, gt: impl Into<JsonValue>, lt: impl Into<JsonValue>) -> Self {
        self.with_gt(gt).with_lt(lt)
    }

    pub fn with_inclusive_between(self, ge: impl Into<JsonValue>, le: impl Into<JsonValue>) -> Self {
        self.with_ge(ge).with_le(le)
    }

    pub fn with_contains(mut self, value: impl Into<JsonValue>) -> Self {
        self.raw.contains = Some(value.into());
        self
    }

    pub fn with_not_contains(mut self, value: impl Into<JsonValue>) -> Self {
        self.raw.not_contains = Some(value.into());
        self
    }

    pub fn with_begins_with(mut self, value: impl Into<JsonValue>) -> Self {
        self.raw.begins_with = Some(value.into());
        self
    }

    pub fn with_in(mut self, values: Vec<JsonValue>) -> Self {
        self.raw.in_values = Some(values);
        self
    }

    pub fn with_type(mut self, kind: FilterType) -> Self {
        self.raw.kind = Some(kind.to_string());
        self
    }

    pub fn build(self) -> Result<FilterParameter> {
        self.raw
            .into_parameter(&self.field)
            .map_err(|(_, message)| RepositoryError::IllegalArgument(message))
    }
}
