use std::collections::BTreeMap;

use log::debug;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::aggregate::RawAggregateFunction;
use super::filter::{FilterParameter, RawFilterParameter};
use super::order_by::OrderByParameter;
use super::query_pack::QueryPack;
use crate::config::RepositoryConfig;
use crate::core::{RepositoryError, Result, ValidationErrors};
use crate::schema::EntitySchema;

/// Raw multi-valued query map as handed over by a transport layer.
pub type QueryMap = BTreeMap<String, Vec<String>>;

pub const LIMIT_KEY: &str = "limit";
pub const IDS_KEY: &str = "ids";
pub const ORDER_BY_KEY: &str = "orderBy";
pub const PROJECTION_KEY: &str = "projection";
pub const AGGREGATE_KEY: &str = "aggregate";
pub const PAGE_TOKEN_KEY: &str = "pageToken";

lazy_static::lazy_static! {
    // `age_1=...` addresses `age`, letting one field carry several filters.
    static ref FIELD_KEY_SUFFIX: Regex = Regex::new(r"_\d+$").expect("field suffix pattern");
}

#[derive(Debug, Deserialize)]
struct ProjectionRequest {
    #[serde(default)]
    fields: Vec<String>,
}

/// Field name addressed by a query key.
pub fn field_of_key(key: &str) -> &str {
    match FIELD_KEY_SUFFIX.find(key) {
        Some(m) => &key[..m.start()],
        None => key,
    }
}

/// Validate the whole query map and assemble a pack. Every problem is
/// collected; any problem rejects the request as a whole.
pub fn build_query_pack<E>(
    schema: &EntitySchema<E>,
    config: &RepositoryConfig,
    route: &str,
    query: &QueryMap,
    request_etag: Option<&str>,
) -> Result<QueryPack> {
    let mut errors = ValidationErrors::new();
    let mut builder = QueryPack::builder(route).with_request_etag(request_etag);
    let mut limit = None;

    for (key, values) in query {
        let Some(first) = values.first() else {
            continue;
        };

        match key.as_str() {
            LIMIT_KEY => limit = parse_limit(first, config.max_limit, &mut errors),
            PAGE_TOKEN_KEY => builder = builder.with_page_token(Some(first)),
            ORDER_BY_KEY => {
                if let Some((order_by, index)) = parse_order_by(schema, first, &mut errors) {
                    builder = builder.with_order_by(order_by).with_index_name(&index);
                }
            }
            IDS_KEY => match serde_json::from_str::<Vec<String>>(first) {
                Ok(ids) => builder = builder.with_ids(ids),
                Err(_) => errors.put("ids_error", "Unable to parse ids, expected a json array of strings!"),
            },
            PROJECTION_KEY => {
                if let Some(fields) = parse_projection(schema, first, &mut errors) {
                    builder = builder.with_projections(fields);
                }
            }
            AGGREGATE_KEY => match serde_json::from_str::<RawAggregateFunction>(first) {
                Ok(raw) => match raw.into_function() {
                    Ok(function) => {
                        let schema_errors = function.validate(schema);
                        if schema_errors.is_empty() {
                            builder = builder.with_aggregate(function);
                        } else {
                            errors.merge(schema_errors);
                        }
                    }
                    Err(raw_errors) => errors.merge(raw_errors),
                },
                Err(_) => errors.put("aggregate_error", "Unable to parse this json..."),
            },
            _ => {
                let field = field_of_key(key);
                if !schema.has_field(field) {
                    errors.put(
                        format!("{}_field_error", key),
                        "This field does not exist on the selected resource.",
                    );
                    continue;
                }
                for raw in values {
                    builder = builder.with_params(parse_filters(key, field, raw, &mut errors));
                }
            }
        }
    }

    if !errors.is_empty() {
        debug!("Rejected query for route='{}': {}", route, errors);
        return Err(RepositoryError::Validation(errors));
    }

    builder
        .with_limit(limit.unwrap_or(config.default_limit))
        .build()
}

fn parse_limit(raw: &str, max_limit: usize, errors: &mut ValidationErrors) -> Option<usize> {
    match raw.trim().parse::<i64>() {
        Ok(l) if l < 1 => {
            errors.put("limit_negative_error", "Limit must be a whole positive Integer!");
            None
        }
        Ok(l) if l as u64 > max_limit as u64 => {
            errors.put("limit_exceed_max_error", format!("Maximum limit is {}!", max_limit));
            None
        }
        Ok(l) => Some(l as usize),
        Err(_) => {
            errors.put("limit_error", "Limit must be a whole positive Integer!");
            None
        }
    }
}

fn parse_order_by<E>(
    schema: &EntitySchema<E>,
    raw: &str,
    errors: &mut ValidationErrors,
) -> Option<(OrderByParameter, String)> {
    let json: JsonValue = match serde_json::from_str(raw) {
        Ok(json) => json,
        Err(_) => {
            errors.put("orderBy_error", "Unable to parse this json...");
            return None;
        }
    };

    let single = match json {
        JsonValue::Array(mut entries) if entries.len() == 1 => entries.remove(0),
        JsonValue::Array(_) => {
            errors.put("orderBy_limit_error", "You must and may only order by a single remoteIndex!");
            return None;
        }
        other => other,
    };

    let order_by: OrderByParameter = match serde_json::from_value(single) {
        Ok(order_by) => order_by,
        Err(_) => {
            errors.put("orderBy_error", "Unable to parse this json...");
            return None;
        }
    };

    if !order_by.is_valid() {
        errors.put("orderBy_parameter_0_error", "Field cannot be null!");
        return None;
    }

    match schema.index_for_range_field(order_by.field()) {
        Some(index) => {
            let name = index.name.clone();
            Some((order_by, name))
        }
        None => {
            errors.put("orderBy_parameter_0_error", "This is not a valid remoteIndex!");
            None
        }
    }
}

fn parse_projection<E>(
    schema: &EntitySchema<E>,
    raw: &str,
    errors: &mut ValidationErrors,
) -> Option<Vec<String>> {
    let request: ProjectionRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(_) => {
            errors.put("projection_error", "Unable to parse this json...");
            return None;
        }
    };

    let unknown: Vec<&str> = request
        .fields
        .iter()
        .map(String::as_str)
        .filter(|field| !schema.has_field(field))
        .collect();

    if unknown.is_empty() {
        Some(request.fields)
    } else {
        errors.put(
            "projection_error",
            format!("Projection fields do not exist on the selected resource: {}", unknown.join(", ")),
        );
        None
    }
}

/// A filter value is a json object, a json array of objects, or a bare
/// scalar which reads as `eq`.
fn parse_filters(key: &str, field: &str, raw: &str, errors: &mut ValidationErrors) -> Vec<FilterParameter> {
    let trimmed = raw.trim_start();
    let raws: Vec<RawFilterParameter> = if trimmed.starts_with('{') {
        match serde_json::from_str::<RawFilterParameter>(raw) {
            Ok(single) => vec![single],
            Err(_) => {
                errors.put(format!("{}_value_json_error", key), "Unable to parse this json...");
                return Vec::new();
            }
        }
    } else if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<RawFilterParameter>>(raw) {
            Ok(many) => many,
            Err(_) => {
                errors.put(format!("{}_value_json_error", key), "Unable to parse this json...");
                return Vec::new();
            }
        }
    } else {
        vec![RawFilterParameter {
            eq: Some(JsonValue::String(raw.to_string())),
            ..Default::default()
        }]
    };

    raws.into_iter()
        .filter_map(|raw| match raw.into_parameter(field) {
            Ok(param) => Some(param),
            Err((error_key, message)) => {
                errors.put(error_key, message);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldType, Value};
    use crate::query::filter::FilterOperator;
    use serde_json::json;

    #[derive(Debug, Clone, Default)]
    struct Person {
        id: String,
        age: i64,
    }

    fn schema() -> EntitySchema<Person> {
        EntitySchema::builder("Person")
            .hash_key("id")
            .field("id", FieldType::Text, |p: &Person| Value::from(p.id.clone()), |p, v| {
                p.id = v.into_text()?;
                Ok(())
            })
            .field("age", FieldType::Integer, |p: &Person| Value::from(p.age), |p, v| {
                p.age = v.into_i64()?;
                Ok(())
            })
            .local_index("byAge", "age")
            .build()
            .unwrap()
    }

    fn query(pairs: &[(&str, &str)]) -> QueryMap {
        let mut map = QueryMap::new();
        for (k, v) in pairs {
            map.entry(k.to_string()).or_default().push(v.to_string());
        }
        map
    }

    fn errors_of(result: Result<QueryPack>) -> ValidationErrors {
        match result {
            Err(RepositoryError::Validation(errors)) => errors,
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_field_suffix_is_stripped() {
        assert_eq!(field_of_key("age_1"), "age");
        assert_eq!(field_of_key("age"), "age");
        assert_eq!(field_of_key("created_at"), "created_at");
    }

    #[test]
    fn test_builds_pack_with_defaults() {
        let config = RepositoryConfig::default();
        let pack = build_query_pack(
            &schema(),
            &config,
            "/people",
            &query(&[
                ("age", r#"{"ge":18}"#),
                ("age_1", r#"{"le":65,"type":"and"}"#),
                ("orderBy", r#"[{"field":"age","direction":"asc"}]"#),
            ]),
            None,
        )
        .unwrap();

        assert_eq!(pack.limit(), Some(20));
        assert_eq!(pack.index_name(), Some("byAge"));
        assert_eq!(pack.params()["age"].len(), 2);
        assert!(pack.order_by().unwrap().is_asc());
    }

    #[test]
    fn test_bare_value_reads_as_eq() {
        let config = RepositoryConfig::default();
        let pack = build_query_pack(&schema(), &config, "/people", &query(&[("id", "NO")]), None).unwrap();
        assert_eq!(pack.params()["id"][0].operator, FilterOperator::Eq(json!("NO")));
    }

    #[test]
    fn test_collects_every_error() {
        let config = RepositoryConfig::default();
        let errors = errors_of(build_query_pack(
            &schema(),
            &config,
            "/people",
            &query(&[
                ("limit", "101"),
                ("height", r#"{"eq":1}"#),
                ("age", r#"{"eq":1"#),
                ("orderBy", r#"[{"field":"age"},{"field":"id"}]"#),
            ]),
            None,
        ));

        assert_eq!(errors.get("limit_exceed_max_error"), Some("Maximum limit is 100!"));
        assert!(errors.contains_key("height_field_error"));
        assert!(errors.contains_key("age_value_json_error"));
        assert!(errors.contains_key("orderBy_limit_error"));
    }

    #[test]
    fn test_limit_and_order_by_messages() {
        let config = RepositoryConfig::default();
        let errors = errors_of(build_query_pack(
            &schema(),
            &config,
            "/people",
            &query(&[("limit", "0"), ("orderBy", r#"{"field":"id"}"#)]),
            None,
        ));
        assert!(errors.contains_key("limit_negative_error"));
        assert_eq!(
            errors.get("orderBy_parameter_0_error"),
            Some("This is not a valid remoteIndex!")
        );

        let errors = errors_of(build_query_pack(
            &schema(),
            &config,
            "/people",
            &query(&[("limit", "ten"), ("projection", r#"{"fields":["nope"]}"#)]),
            None,
        ));
        assert!(errors.contains_key("limit_error"));
        assert!(errors.contains_key("projection_error"));
    }
}
