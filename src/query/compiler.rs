use std::collections::BTreeMap;

use log::debug;
use serde_json::Value as JsonValue;

use super::expression::{Bound, Comparator, Condition, FilterExpression, KeyCondition, KeyOperator};
use super::filter::{BoundKind, FilterOperator, FilterParameter};
use super::query_pack::QueryPack;
use crate::core::{Edge, FieldType, RepositoryError, Result, Value};
use crate::schema::{ETAG_ATTRIBUTE, EntitySchema, KeyShape};

/// Store-native form of a filter map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledQuery {
    pub key_condition: Option<KeyCondition>,
    pub filter: Option<FilterExpression>,
}

/// Access path chosen for a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPlan {
    pub shape: KeyShape,
    pub scan_forward: bool,
}

/// Active index is the order-by index, else the pagination index.
pub fn apply_order_by<E>(schema: &EntitySchema<E>, pack: &QueryPack) -> Result<OrderPlan> {
    let shape = match pack.index_name() {
        Some(index) => schema.key_shape(Some(index))?,
        None => schema.default_shape(),
    };
    let scan_forward = pack.order_by().is_some_and(|o| o.is_asc());
    Ok(OrderPlan { shape, scan_forward })
}

/// Field whose filters may become the key condition.
pub fn active_range_field<E>(schema: &EntitySchema<E>, pack: &QueryPack) -> Option<String> {
    if let Some(order_by) = pack.order_by().filter(|o| o.is_valid()) {
        return Some(order_by.field().to_string());
    }
    match pack.index_name() {
        Some(index) => schema.index(index).map(|idx| idx.range_field.clone()),
        None => schema.default_shape().range_field,
    }
}

pub fn has_illegal_ranged_key(params: &BTreeMap<String, Vec<FilterParameter>>, range_field: Option<&str>) -> bool {
    range_field
        .and_then(|field| params.get(field))
        .is_some_and(|group| group.iter().any(FilterParameter::is_illegal_ranged_key_param))
}

/// Key condition for the range field plus a filter expression for the rest.
pub fn compile_query<E>(
    schema: &EntitySchema<E>,
    params: &BTreeMap<String, Vec<FilterParameter>>,
    range_field: Option<&str>,
) -> Result<CompiledQuery> {
    let key_group = range_field
        .and_then(|field| params.get(field).map(|group| (field, group)))
        .filter(|(_, group)| group.iter().all(is_key_expressible));

    let key_condition = match key_group {
        Some((field, group)) => Some(build_key_condition(schema, field, group)?),
        None => None,
    };

    let skip = key_condition.as_ref().map(|k| k.field.as_str());
    let filter = FilterCompiler::new(schema).compile(params, skip)?;

    if let Some(key) = &key_condition {
        debug!("Key condition: {}", key);
    }
    if let Some(filter) = &filter {
        debug!("Filter expression: {}", filter);
    }

    Ok(CompiledQuery { key_condition, filter })
}

/// Same translation without key extraction.
pub fn compile_scan<E>(
    schema: &EntitySchema<E>,
    params: &BTreeMap<String, Vec<FilterParameter>>,
) -> Result<Option<FilterExpression>> {
    FilterCompiler::new(schema).compile(params, None)
}

/// Projection list widened with the key and etag attributes the engines
/// need.
/// An empty list stays empty and means every attribute.
pub fn build_projections<E>(schema: &EntitySchema<E>, projections: &[String], shape: &KeyShape) -> Vec<String> {
    if projections.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<String> = projections.to_vec();
    let mut required = vec![schema.hash_key().to_string()];
    required.extend(schema.range_key().map(str::to_string));
    required.extend(shape.range_field.clone());
    if shape.global {
        required.push(shape.hash_field.clone());
    }
    required.push(ETAG_ATTRIBUTE.to_string());

    for field in required {
        if !out.contains(&field) {
            out.push(field);
        }
    }
    out
}

/// Parse a json filter value into the field's type, optionally widened
/// at an inclusive edge.
pub fn coerce_value<E>(
    schema: &EntitySchema<E>,
    field: &str,
    json: &JsonValue,
    edge: Option<Edge>,
) -> Result<Value> {
    let field_type = schema.field_type(field)?;
    match edge {
        Some(edge) => field_type.coerce_with_edge(Value::from_json(json), edge),
        None => field_type.coerce_json(json),
    }
}

fn is_key_expressible(param: &FilterParameter) -> bool {
    !param.is_illegal_ranged_key_param() && !matches!(param.operator, FilterOperator::Ne(_))
}

fn build_key_condition<E>(schema: &EntitySchema<E>, field: &str, group: &[FilterParameter]) -> Result<KeyCondition> {
    let coerce = |json: &JsonValue, edge: Option<Edge>| coerce_value(schema, field, json, edge);

    let operator = match group {
        [single] => match &single.operator {
            FilterOperator::Eq(v) => KeyOperator::Eq(coerce(v, None)?),
            FilterOperator::Gt(v) => KeyOperator::Gt(coerce(v, None)?),
            FilterOperator::Lt(v) => KeyOperator::Lt(coerce(v, None)?),
            FilterOperator::Ge(v) => KeyOperator::Ge(coerce(v, None)?),
            FilterOperator::Le(v) => KeyOperator::Le(coerce(v, None)?),
            FilterOperator::BeginsWith(v) => KeyOperator::BeginsWith(coerce(v, None)?),
            FilterOperator::Between { gt, lt } => KeyOperator::Between(coerce(gt, None)?, coerce(lt, None)?),
            FilterOperator::InclusiveBetween { ge, le } => {
                KeyOperator::Between(coerce(ge, Some(Edge::Lower))?, coerce(le, Some(Edge::Upper))?)
            }
            FilterOperator::GeLtBetween { ge, lt } => {
                KeyOperator::Between(coerce(ge, Some(Edge::Lower))?, coerce(lt, None)?)
            }
            FilterOperator::LeGtBetween { gt, le } => {
                KeyOperator::Between(coerce(gt, None)?, coerce(le, Some(Edge::Upper))?)
            }
            other => {
                return Err(RepositoryError::IllegalArgument(format!(
                    "{:?} cannot be used as a key condition on '{}'",
                    other, field
                )));
            }
        },
        [first, second] => {
            let (Some(a), Some(b)) = (first.single_bound(), second.single_bound()) else {
                return Err(illegal_pair(field));
            };
            let (lower, upper) = match (a.0.is_lower(), b.0.is_lower()) {
                (true, false) => (a, b),
                (false, true) => (b, a),
                _ => return Err(illegal_pair(field)),
            };
            let low_edge = (lower.0 == BoundKind::Ge).then_some(Edge::Lower);
            let high_edge = (upper.0 == BoundKind::Le).then_some(Edge::Upper);
            KeyOperator::Between(coerce(lower.1, low_edge)?, coerce(upper.1, high_edge)?)
        }
        _ => {
            return Err(RepositoryError::IllegalArgument(format!(
                "At most two conditions may target the range key '{}'",
                field
            )));
        }
    };

    Ok(KeyCondition::new(field, operator))
}

fn illegal_pair(field: &str) -> RepositoryError {
    RepositoryError::IllegalArgument(format!(
        "Range key '{}' takes one lower and one upper bound when filtered twice",
        field
    ))
}

struct FilterCompiler<'a, E> {
    schema: &'a EntitySchema<E>,
    names: BTreeMap<String, String>,
    values: BTreeMap<String, Value>,
    name_count: usize,
    value_count: usize,
    in_count: usize,
}

impl<'a, E> FilterCompiler<'a, E> {
    fn new(schema: &'a EntitySchema<E>) -> Self {
        Self {
            schema,
            names: BTreeMap::new(),
            values: BTreeMap::new(),
            name_count: 0,
            value_count: 0,
            in_count: 0,
        }
    }

    fn compile(
        mut self,
        params: &BTreeMap<String, Vec<FilterParameter>>,
        skip: Option<&str>,
    ) -> Result<Option<FilterExpression>> {
        let mut groups = Vec::new();

        for (field, group) in params {
            if Some(field.as_str()) == skip || group.is_empty() {
                continue;
            }

            let name = format!("#name{}", self.name_count);
            self.name_count += 1;
            self.names.insert(name.clone(), field.clone());

            let mut members = Vec::with_capacity(group.len());
            for param in group {
                members.push((param.kind, self.condition(&name, param)?));
            }
            groups.push(Condition::Group(members));
        }

        if groups.is_empty() {
            return Ok(None);
        }

        Ok(Some(FilterExpression {
            condition: Condition::All(groups),
            names: self.names,
            values: self.values,
        }))
    }

    fn value(&mut self, field: &str, json: &JsonValue) -> Result<String> {
        let placeholder = format!(":val{}", self.value_count);
        self.value_count += 1;
        let value = self.coerce(field, json)?;
        self.values.insert(placeholder.clone(), value);
        Ok(placeholder)
    }

    fn coerce(&self, field: &str, json: &JsonValue) -> Result<Value> {
        // Membership tests on list fields compare against one element.
        match self.schema.field_type(field)? {
            FieldType::List => Ok(Value::from_json(json)),
            field_type => field_type.coerce_json(json),
        }
    }

    fn compare(&mut self, name: &str, field: &str, comparator: Comparator, json: &JsonValue) -> Result<Condition> {
        Ok(Condition::Compare {
            name: name.to_string(),
            comparator,
            value: self.value(field, json)?,
        })
    }

    fn range(
        &mut self,
        name: &str,
        field: &str,
        first: (Comparator, &JsonValue),
        second: (Comparator, &JsonValue),
    ) -> Result<Condition> {
        Ok(Condition::Range {
            name: name.to_string(),
            first: Bound {
                comparator: first.0,
                value: self.value(field, first.1)?,
            },
            second: Bound {
                comparator: second.0,
                value: self.value(field, second.1)?,
            },
        })
    }

    fn condition(&mut self, name: &str, param: &FilterParameter) -> Result<Condition> {
        let field = param.field.as_str();
        match &param.operator {
            FilterOperator::Eq(v) => self.compare(name, field, Comparator::Eq, v),
            FilterOperator::Ne(v) => self.compare(name, field, Comparator::Ne, v),
            FilterOperator::Gt(v) => self.compare(name, field, Comparator::Gt, v),
            FilterOperator::Lt(v) => self.compare(name, field, Comparator::Lt, v),
            FilterOperator::Ge(v) => self.compare(name, field, Comparator::Ge, v),
            FilterOperator::Le(v) => self.compare(name, field, Comparator::Le, v),
            FilterOperator::Between { gt, lt } => {
                self.range(name, field, (Comparator::Gt, gt), (Comparator::Lt, lt))
            }
            FilterOperator::InclusiveBetween { ge, le } => {
                self.range(name, field, (Comparator::Ge, ge), (Comparator::Le, le))
            }
            FilterOperator::GeLtBetween { ge, lt } => {
                self.range(name, field, (Comparator::Ge, ge), (Comparator::Lt, lt))
            }
            FilterOperator::LeGtBetween { gt, le } => {
                self.range(name, field, (Comparator::Le, le), (Comparator::Gt, gt))
            }
            FilterOperator::Contains(v) => Ok(Condition::Contains {
                name: name.to_string(),
                value: self.value(field, v)?,
            }),
            FilterOperator::NotContains(v) => Ok(Condition::NotContains {
                name: name.to_string(),
                value: self.value(field, v)?,
            }),
            FilterOperator::BeginsWith(v) => Ok(Condition::BeginsWith {
                name: name.to_string(),
                value: self.value(field, v)?,
            }),
            FilterOperator::In(candidates) => {
                let mut values = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    let placeholder = format!(":inVal{}", self.in_count);
                    self.in_count += 1;
                    let value = self.coerce(field, candidate)?;
                    self.values.insert(placeholder.clone(), value);
                    values.push(placeholder);
                }
                Ok(Condition::In {
                    name: name.to_string(),
                    values,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::FilterType;
    use crate::store::Item;
    use serde_json::json;

    #[derive(Debug, Clone, Default)]
    struct Person {
        id: String,
        age: i64,
        score: f64,
        tags: Vec<String>,
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
            .field("score", FieldType::Double, |p: &Person| Value::from(p.score), |p, v| {
                p.score = v.into_f64()?;
                Ok(())
            })
            .field("tags", FieldType::List, |p: &Person| Value::from(p.tags.clone()), |p, v| {
                p.tags = v.into_list()?.into_iter().map(|t| t.to_string()).collect();
                Ok(())
            })
            .local_index("byAge", "age")
            .local_index("byScore", "score")
            .build()
            .unwrap()
    }

    fn params(list: Vec<FilterParameter>) -> BTreeMap<String, Vec<FilterParameter>> {
        let mut map: BTreeMap<String, Vec<FilterParameter>> = BTreeMap::new();
        for p in list {
            map.entry(p.field.clone()).or_default().push(p);
        }
        map
    }

    #[test]
    fn test_inclusive_range_becomes_shifted_key_condition() {
        let schema = schema();
        let inclusive = params(vec![
            FilterParameter::builder("age").with_inclusive_between(18, 65).build().unwrap(),
        ]);

        let compiled = compile_query(&schema, &inclusive, Some("age")).unwrap();
        assert_eq!(
            compiled.key_condition,
            Some(KeyCondition::new("age", KeyOperator::Between(Value::from(17), Value::from(66))))
        );
        assert!(compiled.filter.is_none());

        let filtered = compile_query(&schema, &inclusive, None).unwrap();
        assert!(filtered.key_condition.is_none());
        assert_eq!(filtered.filter.unwrap().render(), "(#name0 >= :val0 and #name0 <= :val1)");
    }

    #[test]
    fn test_paired_bounds_combine_in_either_order() {
        let schema = schema();
        let pair = params(vec![
            FilterParameter::builder("score").with_le(2.0).build().unwrap(),
            FilterParameter::builder("score").with_gt(1.0).build().unwrap(),
        ]);
        let compiled = compile_query(&schema, &pair, Some("score")).unwrap();
        match compiled.key_condition.unwrap().operator {
            KeyOperator::Between(Value::Float(low), Value::Float(high)) => {
                assert!((low - 1.0).abs() < 1e-9);
                assert!((high - 2.1).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }

        let bad = params(vec![
            FilterParameter::builder("age").with_gt(1).build().unwrap(),
            FilterParameter::builder("age").with_ge(2).build().unwrap(),
        ]);
        assert!(compile_query(&schema, &bad, Some("age")).is_err());
    }

    #[test]
    fn test_illegal_ranged_params_stay_in_filter() {
        let schema = schema();
        let map = params(vec![
            FilterParameter::builder("age").with_in(vec![json!(1), json!("2")]).build().unwrap(),
            FilterParameter::builder("tags")
                .with_contains("x")
                .with_type(FilterType::Or)
                .build()
                .unwrap(),
        ]);
        assert!(has_illegal_ranged_key(&map, Some("age")));

        let compiled = compile_query(&schema, &map, Some("age")).unwrap();
        assert!(compiled.key_condition.is_none());
        let filter = compiled.filter.unwrap();
        assert_eq!(
            filter.render(),
            "(#name0 IN (:inVal0, :inVal1)) AND (contains(#name1, :val0))"
        );
        assert_eq!(filter.values[":inVal1"], Value::Integer(2));

        let mut item = Item::new();
        item.insert("age".into(), Value::from(2));
        item.insert("tags".into(), Value::List(vec![Value::from("x")]));
        assert!(filter.matches(&item));
    }

    #[test]
    fn test_build_projections_appends_keys() {
        let schema = schema();
        let shape = schema.key_shape(Some("byAge")).unwrap();
        let widened = build_projections(&schema, &["score".to_string()], &shape);
        assert_eq!(widened, vec!["score", "id", "age", "etag"]);
        assert!(build_projections(&schema, &[], &shape).is_empty());
    }

    #[test]
    fn test_coercion_failure_propagates() {
        let schema = schema();
        let map = params(vec![FilterParameter::builder("age").with_eq("abc").build().unwrap()]);
        assert!(compile_scan(&schema, &map).is_err());
    }
}
