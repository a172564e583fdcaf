//! Multi-level grouping of aggregation input.
//!
//! A level either groups by the string form of a field or, when ranged, by
//! a bucket `{floor, base, ratio, ceil}` of width `W`:
//! `ratio = floor(v / W)`, `floor = ratio·W`, `ceil = (ratio + 2)·W`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue, json};

use crate::core::{Result, Value};
use crate::query::{GroupingConfiguration, SortDirection};
use crate::schema::{Entity, EntitySchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub floor: i64,
    pub base: i64,
    pub ratio: i64,
    pub ceil: i64,
}

impl Bucket {
    pub fn of(value: i64, width: i64) -> Self {
        let ratio = value.div_euclid(width);
        // Saturates at the ends of the i64 range instead of wrapping.
        Self {
            floor: ratio.saturating_mul(width),
            base: width,
            ratio,
            ceil: ratio.saturating_add(2).saturating_mul(width),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GroupKey {
    Plain(String),
    Ranged(Bucket),
}

impl GroupKey {
    fn sort_key(&self) -> (i64, &str) {
        match self {
            Self::Plain(key) => (0, key.as_str()),
            Self::Ranged(bucket) => (bucket.floor, ""),
        }
    }
}

/// Produces the aggregated value of one innermost group.
pub type LeafFn<'f, E> = dyn Fn(&[&E]) -> Result<JsonValue> + 'f;

/// Group `items` by `levels` (one to three) and render every level.
/// `result_key` is the lower-case function name the group values are
/// stored under.
pub fn group<E: Entity>(
    schema: &EntitySchema<E>,
    items: &[&E],
    levels: &[GroupingConfiguration],
    result_key: &str,
    leaf: &LeafFn<'_, E>,
) -> Result<JsonValue> {
    let Some((level, rest)) = levels.split_first() else {
        return leaf(items);
    };

    let mut groups: BTreeMap<String, (GroupKey, Vec<&E>)> = BTreeMap::new();
    for &item in items {
        let key = group_key(schema, item, level)?;
        let id = match &key {
            GroupKey::Plain(k) => k.clone(),
            GroupKey::Ranged(b) => b.floor.to_string(),
        };
        groups.entry(id).or_insert_with(|| (key, Vec::new())).1.push(item);
    }
    let total_group_count = groups.len();

    let mut rendered = Vec::with_capacity(groups.len());
    for (_, (key, members)) in groups {
        let value = group(schema, &members, rest, result_key, leaf)?;
        rendered.push((key, value));
    }

    sort_level(&mut rendered, level);
    rendered.truncate(level.effective_limit());

    let results: Vec<JsonValue> = rendered
        .into_iter()
        .map(|(key, value)| {
            let mut entry = Map::new();
            match key {
                GroupKey::Plain(k) => {
                    entry.insert("groupByKey".to_string(), JsonValue::String(k));
                }
                GroupKey::Ranged(b) => {
                    entry.insert("floor".to_string(), b.floor.into());
                    entry.insert("ceil".to_string(), b.ceil.into());
                }
            }
            entry.insert(result_key.to_string(), value);
            JsonValue::Object(entry)
        })
        .collect();

    let mut level_json = json!({
        "totalGroupCount": total_group_count,
        "count": results.len(),
        "results": results,
    });
    if let (Some(unit), Some(range), Some(map)) =
        (level.group_by_unit, level.group_by_range, level_json.as_object_mut())
    {
        map.insert(
            "rangeGrouping".to_string(),
            json!({ "unit": unit, "range": range.to_json() }),
        );
    }
    Ok(level_json)
}

fn group_key<E>(schema: &EntitySchema<E>, item: &E, level: &GroupingConfiguration) -> Result<GroupKey> {
    let value = schema.get(item, &level.group_by)?;
    let Some(range) = level.group_by_range.filter(|_| level.has_group_ranging()) else {
        return Ok(GroupKey::Plain(value.to_string()));
    };

    let raw = match &value {
        Value::Date(date) => date.timestamp_millis(),
        other => other.as_f64().map(|f| f.floor() as i64).unwrap_or(0),
    };
    Ok(GroupKey::Ranged(Bucket::of(raw, range.width())))
}

/// Ranged levels sort by floor. Plain levels sort by key when the group
/// values are collections, otherwise by the aggregated value.
fn sort_level(rendered: &mut [(GroupKey, JsonValue)], level: &GroupingConfiguration) {
    let by_key = rendered
        .first()
        .is_some_and(|(_, value)| value.is_array() || value.is_object());

    rendered.sort_by(|(ka, va), (kb, vb)| {
        let ordering = if level.has_group_ranging() || by_key {
            ka.sort_key().cmp(&kb.sort_key())
        } else {
            compare_numbers(va, vb).then_with(|| ka.sort_key().cmp(&kb.sort_key()))
        };
        match level.grouping_sort_order {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

fn compare_numbers(a: &JsonValue, b: &JsonValue) -> Ordering {
    let a = a.as_f64().unwrap_or(f64::NEG_INFINITY);
    let b = b.as_f64().unwrap_or(f64::NEG_INFINITY);
    a.total_cmp(&b)
}
