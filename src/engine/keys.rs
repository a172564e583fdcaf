//! Cache and etag key formats.

use xxhash_rust::xxh3::xxh3_64;

use crate::query::{AggregateFunction, AggregateFunctions};

/// Listing scope of a query over every hash.
pub const ROOT_SCOPE: &str = "root";

fn hex_hash(raw: &str) -> String {
    format!("{:x}", xxh3_64(raw.as_bytes()))
}

pub fn projections_hash(projections: &[String]) -> String {
    hex_hash(&projections.join(","))
}

/// `{Type}_{hash}[/{range}]`
pub fn object_cache_id(type_name: &str, hash: &str, range: Option<&str>) -> String {
    match range {
        Some(range) => format!("{}_{}/{}", type_name, hash, range),
        None => short_cache_id(type_name, hash),
    }
}

/// `{Type}_{hash}`, the id a hash-only lookup resolves through.
pub fn short_cache_id(type_name: &str, hash: &str) -> String {
    format!("{}_{}", type_name, hash)
}

/// Object id narrowed to a projection.
pub fn projection_cache_id(object_id: &str, projections: &[String]) -> String {
    if projections.is_empty() {
        object_id.to_string()
    } else {
        format!("{}/projection/{}", object_id, projections_hash(projections))
    }
}

/// `hash`, `GSI_{index}_{hash}` or `root`.
pub fn list_scope(hash: Option<&str>, gsi: Option<&str>) -> String {
    match (hash, gsi) {
        (Some(hash), Some(index)) => format!("GSI_{}_{}", index, hash),
        (Some(hash), None) => hash.to_string(),
        (None, _) => ROOT_SCOPE.to_string(),
    }
}

pub fn item_list_cache_id(type_name: &str, scope: &str, base_etag_key: &str) -> String {
    format!("{}_{}/{}", type_name, scope, base_etag_key)
}

pub fn item_list_etags_key(type_name: &str, scope: &str) -> String {
    format!("{}_{}_itemListEtags", type_name, scope)
}

pub fn projection_etag_base(type_name: &str, hash: &str) -> String {
    format!("{}_{}/projections", type_name, hash)
}

pub fn projection_etag_key(type_name: &str, hash: &str, projections: &[String]) -> String {
    format!("{}{}", projection_etag_base(type_name, hash), projections_hash(projections))
}

/// `{scope}_{base}_{field}_{FUNC}{groupingHash}`; COUNT leaves out the field.
pub fn aggregation_key(scope: &str, base_etag_key: &str, function: &AggregateFunction) -> String {
    let grouping = serde_json::to_string(&function.group_by).unwrap_or_default();
    let grouping_hash = if function.group_by.is_empty() {
        String::new()
    } else {
        hex_hash(&grouping)
    };

    match function.function {
        AggregateFunctions::Count => format!("{}_{}_COUNT{}", scope, base_etag_key, grouping_hash),
        other => format!(
            "{}_{}_{}_{}{}",
            scope,
            base_etag_key,
            function.field(),
            other.name(),
            grouping_hash
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::GroupingConfiguration;

    #[test]
    fn test_object_and_list_ids() {
        assert_eq!(object_cache_id("User", "u1", None), "User_u1");
        assert_eq!(object_cache_id("Order", "alice", Some("7")), "Order_alice/7");
        assert_eq!(projection_cache_id("User_u1", &[]), "User_u1");
        assert!(projection_cache_id("User_u1", &["age".into()]).starts_with("User_u1/projection/"));

        assert_eq!(list_scope(None, None), "root");
        assert_eq!(list_scope(Some("NO"), Some("byCountry")), "GSI_byCountry_NO");
        assert_eq!(item_list_cache_id("User", "root", "abc"), "User_root/abc");
        assert_eq!(item_list_etags_key("User", "root"), "User_root_itemListEtags");
    }

    #[test]
    fn test_aggregation_keys() {
        let count = AggregateFunction::builder(AggregateFunctions::Count).build().unwrap();
        assert_eq!(aggregation_key("root", "k", &count), "root_k_COUNT");
        assert_ne!(aggregation_key("d1", "k", &count), aggregation_key("d2", "k", &count));

        let grouped = AggregateFunction::builder(AggregateFunctions::Avg)
            .with_field("age")
            .add_group_by(GroupingConfiguration::new("country"))
            .and_then(|b| b.build())
            .unwrap();
        let key = aggregation_key("root", "k", &grouped);
        assert!(key.starts_with("root_k_age_AVG"));
        assert!(key.len() > "root_k_age_AVG".len());
    }
}
