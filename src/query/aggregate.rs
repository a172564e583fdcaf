use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::order_by::SortDirection;
use crate::core::{FieldType, RepositoryError, Result, ValidationErrors};
use crate::schema::EntitySchema;

pub const MAX_GROUPING_DEPTH: usize = 3;
pub const DEFAULT_GROUPING_LIST_LIMIT: usize = 10;
pub const MAX_GROUPING_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunctions {
    Min,
    Max,
    Avg,
    Sum,
    Count,
}

impl AggregateFunctions {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            "AVG" => Some(Self::Avg),
            "SUM" => Some(Self::Sum),
            "COUNT" => Some(Self::Count),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
            Self::Sum => "SUM",
            Self::Count => "COUNT",
        }
    }

    /// Key of the computed value in result payloads.
    pub fn result_key(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Count => "count",
        }
    }
}

impl fmt::Display for AggregateFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Fixed-width calendar approximations used for date bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DateUnit {
    Hour,
    TwelveHour,
    Day,
    Week,
    Month,
    Year,
}

impl DateUnit {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "HOUR" => Some(Self::Hour),
            "TWELVE_HOUR" => Some(Self::TwelveHour),
            "DAY" => Some(Self::Day),
            "WEEK" => Some(Self::Week),
            "MONTH" => Some(Self::Month),
            "YEAR" => Some(Self::Year),
            _ => None,
        }
    }

    pub fn width_millis(&self) -> i64 {
        const HOUR: i64 = 60 * 60 * 1000;
        const DAY: i64 = 24 * HOUR;
        match self {
            Self::Hour => HOUR,
            Self::TwelveHour => 12 * HOUR,
            Self::Day => DAY,
            Self::Week => 7 * DAY,
            Self::Month => 30 * DAY,
            Self::Year => 365 * DAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupingUnit {
    Integer,
    Date,
}

impl GroupingUnit {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("integer") {
            Some(Self::Integer)
        } else if raw.eq_ignore_ascii_case("date") {
            Some(Self::Date)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum GroupingRange {
    Width(i64),
    Date(DateUnit),
}

impl GroupingRange {
    pub fn width(&self) -> i64 {
        match self {
            Self::Width(w) => *w,
            Self::Date(unit) => unit.width_millis(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Width(w) => JsonValue::from(*w),
            Self::Date(unit) => serde_json::to_value(unit).unwrap_or(JsonValue::Null),
        }
    }
}

/// One grouping level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingConfiguration {
    pub group_by: String,
    pub group_by_unit: Option<GroupingUnit>,
    pub group_by_range: Option<GroupingRange>,
    pub grouping_sort_order: SortDirection,
    /// 0 means the full list.
    pub grouping_list_limit: usize,
}

impl GroupingConfiguration {
    pub fn new(group_by: &str) -> Self {
        Self {
            group_by: group_by.to_string(),
            group_by_unit: None,
            group_by_range: None,
            grouping_sort_order: SortDirection::Desc,
            grouping_list_limit: DEFAULT_GROUPING_LIST_LIMIT,
        }
    }

    pub fn with_integer_range(mut self, width: i64) -> Self {
        self.group_by_unit = Some(GroupingUnit::Integer);
        self.group_by_range = Some(GroupingRange::Width(width));
        self
    }

    pub fn with_date_range(mut self, unit: DateUnit) -> Self {
        self.group_by_unit = Some(GroupingUnit::Date);
        self.group_by_range = Some(GroupingRange::Date(unit));
        self
    }

    pub fn with_sort_order(mut self, order: SortDirection) -> Self {
        self.grouping_sort_order = order;
        self
    }

    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.grouping_list_limit = limit;
        self
    }

    pub fn has_group_ranging(&self) -> bool {
        self.group_by_unit.is_some()
    }

    pub fn is_full_list(&self) -> bool {
        self.grouping_list_limit == 0
    }

    /// Effective truncation length.
    pub fn effective_limit(&self) -> usize {
        if self.is_full_list() {
            usize::MAX
        } else {
            self.grouping_list_limit
        }
    }

    pub fn validate<E>(&self, schema: &EntitySchema<E>, errors: &mut ValidationErrors) {
        if self.grouping_list_limit > MAX_GROUPING_LIST_LIMIT {
            errors.put(
                "groupingListLimit",
                format!(
                    "{}: Must be an Integer between inclusive 1 and inclusive 100! If you are looking for a full list, set the size to 0!",
                    self.group_by
                ),
            );
        }

        let field_type = match schema.field_type(&self.group_by) {
            Ok(t) => t,
            Err(_) => {
                errors.put("field_error", "The requested field does not exist on this model...");
                return;
            }
        };

        let type_ok = match (self.group_by_unit, self.group_by_range) {
            (None, _) => true,
            (Some(GroupingUnit::Integer), Some(GroupingRange::Width(w))) => {
                field_type.is_numeric() && w > 0
            }
            (Some(GroupingUnit::Date), Some(GroupingRange::Date(_))) => field_type == FieldType::Date,
            _ => false,
        };

        if !type_ok {
            errors.put(
                "field_error",
                "This field is not of a type that can be aggregated with this function!",
            );
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateFunction {
    pub function: AggregateFunctions,
    pub field: Option<String>,
    pub group_by: Vec<GroupingConfiguration>,
}

impl AggregateFunction {
    pub fn builder(function: AggregateFunctions) -> AggregateFunctionBuilder {
        AggregateFunctionBuilder {
            function,
            field: None,
            group_by: Vec::new(),
        }
    }

    pub fn has_grouping(&self) -> bool {
        !self.group_by.is_empty()
    }

    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or_default()
    }

    /// Schema checks that must pass before any backend call.
    pub fn validate<E>(&self, schema: &EntitySchema<E>) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if self.group_by.len() > MAX_GROUPING_DEPTH {
            errors.put("aggregate_error", "You can only group 3 levels deep!");
        }

        if self.function != AggregateFunctions::Count {
            match self.field.as_deref() {
                None | Some("") => {
                    errors.put(
                        format!("{}_error", self.function.result_key()),
                        "Field name cannot be null...",
                    );
                }
                Some(field) => match schema.field_type(field) {
                    Ok(t) if t.is_numeric() => {}
                    Ok(_) => errors.put(
                        "field_error",
                        "This field is not of a type that can be aggregated with this function!",
                    ),
                    Err(_) => errors.put("field_error", "The requested field does not exist on this model..."),
                },
            }
        }

        for grouping in &self.group_by {
            grouping.validate(schema, &mut errors);
        }

        errors
    }
}

pub struct AggregateFunctionBuilder {
    function: AggregateFunctions,
    field: Option<String>,
    group_by: Vec<GroupingConfiguration>,
}

impl AggregateFunctionBuilder {
    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn with_group_by(mut self, group_by: Vec<GroupingConfiguration>) -> Result<Self> {
        if self.group_by.len() + group_by.len() > MAX_GROUPING_DEPTH {
            return Err(RepositoryError::IllegalArgument(
                "You can only group 3 levels deep!".to_string(),
            ));
        }
        self.group_by.extend(group_by);
        Ok(self)
    }

    pub fn add_group_by(self, grouping: GroupingConfiguration) -> Result<Self> {
        self.with_group_by(vec![grouping])
    }

    pub fn build(self) -> Result<AggregateFunction> {
        if self.field.is_none() && self.function != AggregateFunctions::Count {
            return Err(RepositoryError::IllegalArgument("Field cannot be null!".to_string()));
        }
        Ok(AggregateFunction {
            function: self.function,
            field: self.field,
            group_by: self.group_by,
        })
    }
}

/// Wire shape of `aggregate=` on the query surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAggregateFunction {
    pub function: Option<String>,
    pub field: Option<String>,
    #[serde(default)]
    pub group_by: Vec<RawGroupingConfiguration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGroupingConfiguration {
    pub group_by: Option<String>,
    pub group_by_unit: Option<String>,
    pub group_by_range: Option<JsonValue>,
    pub grouping_sort_order: Option<String>,
    pub grouping_list_limit: Option<i64>,
}

impl RawAggregateFunction {
    pub fn into_function(self) -> std::result::Result<AggregateFunction, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let function = self.function.as_deref().and_then(AggregateFunctions::parse);
        if function.is_none() {
            errors.put("aggregate_error", "Function must be one of MIN, MAX, AVG, SUM or COUNT!");
        }

        if self.group_by.len() > MAX_GROUPING_DEPTH {
            errors.put("aggregate_error", "You can only group 3 levels deep!");
        }

        let group_by: Vec<GroupingConfiguration> = self
            .group_by
            .into_iter()
            .filter_map(|raw| raw.into_configuration(&mut errors))
            .collect();

        match function {
            Some(function) if errors.is_empty() => Ok(AggregateFunction {
                function,
                field: self.field,
                group_by,
            }),
            _ => Err(errors),
        }
    }
}

impl RawGroupingConfiguration {
    fn into_configuration(self, errors: &mut ValidationErrors) -> Option<GroupingConfiguration> {
        let Some(group_by) = self.group_by.filter(|g| !g.is_empty()) else {
            errors.put("groupBy_error", "Field cannot be null for a group by parameter!");
            return None;
        };

        let sort = match self.grouping_sort_order.as_deref() {
            None => SortDirection::Desc,
            Some(raw) => match SortDirection::parse(raw) {
                Some(direction) => direction,
                None => {
                    errors.put(
                        "groupSortOrder",
                        format!("{}: Only ASC or DESC may be chosen for sorting order!", group_by),
                    );
                    SortDirection::Desc
                }
            },
        };

        let limit = match self.grouping_list_limit {
            None => DEFAULT_GROUPING_LIST_LIMIT,
            Some(l) if l >= 0 && (l as usize) <= MAX_GROUPING_LIST_LIMIT => l as usize,
            Some(_) => {
                errors.put(
                    "groupingListLimit",
                    format!(
                        "{}: Must be an Integer between inclusive 1 and inclusive 100! If you are looking for a full list, set the size to 0!",
                        group_by
                    ),
                );
                DEFAULT_GROUPING_LIST_LIMIT
            }
        };

        let unit = match self.group_by_unit.as_deref().filter(|u| !u.is_empty()) {
            None => None,
            Some(raw) => match GroupingUnit::parse(raw) {
                Some(unit) => Some(unit),
                None => {
                    errors.put("groupByUnit_error", format!("{}: Unit must be INTEGER or DATE!", group_by));
                    None
                }
            },
        };

        let range = match (unit, &self.group_by_range) {
            (None, _) => None,
            (Some(GroupingUnit::Integer), Some(raw)) => raw
                .as_i64()
                .or_else(|| raw.as_str().and_then(|s| s.parse().ok()))
                .map(GroupingRange::Width),
            (Some(GroupingUnit::Date), Some(raw)) => {
                raw.as_str().and_then(DateUnit::parse).map(GroupingRange::Date)
            }
            (Some(_), None) => None,
        };

        if unit.is_some() && range.is_none() {
            errors.put(
                "groupByRange_error",
                format!("{}: A valid range is required when ranging by unit!", group_by),
            );
        }

        Some(GroupingConfiguration {
            group_by,
            group_by_unit: unit,
            group_by_range: range,
            grouping_sort_order: sort,
            grouping_list_limit: limit,
        })
    }
}
