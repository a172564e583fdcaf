//! Conditional-response state: one etag per record, per projection, per
//! listing and per aggregation, so a caller holding a current etag can be
//! answered with "not modified".

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::Result;

pub use memory::InMemoryETagManager;

/// Name of the map holding single-record etags.
pub const OBJECT_ETAG_MAP: &str = "OBJECT_ETAG_MAP";

/// Render a content hash as an etag.
pub fn new_etag(hash: u64) -> String {
    format!("{:016x}", hash)
}

/// List etag: XOR of the item etags. Order-insensitive; an empty list
/// folds to zero.
pub fn fold_etags<'a, I>(etags: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let folded = etags
        .into_iter()
        .filter_map(|etag| u64::from_str_radix(etag, 16).ok())
        .fold(0u64, |acc, hash| acc ^ hash);
    new_etag(folded)
}

/// Etag bookkeeping for one entity type. `list_key` names a listing scope
/// (`{Type}_{scope}_itemListEtags`) and `etag_key` an entry inside it.
#[async_trait]
pub trait ETagManager: Send + Sync {
    async fn set_single_record_etag(&self, etags: &BTreeMap<String, String>) -> Result<()>;

    async fn set_projection_etags(&self, projections: &[String], hash: &str, etag: &str) -> Result<()>;

    async fn remove_projections_etags(&self, hash: &str) -> Result<()>;

    async fn set_item_list_etags(&self, list_key: &str, etag_key: &str, etag: &str) -> Result<()>;

    async fn replace_aggregation_etag(&self, list_key: &str, etag_key: &str, etag: &str) -> Result<()>;

    /// Drop every listing and aggregation etag of a scope.
    async fn destroy_etags(&self, scope: &str) -> Result<()>;

    async fn check_item_etag(&self, key_base: &str, key: &str, etag: &str) -> Result<bool>;

    async fn check_item_list_etag(&self, list_key: &str, etag_key: &str, etag: &str) -> Result<bool>;

    async fn check_aggregation_etag(&self, list_key: &str, etag_key: &str, etag: &str) -> Result<bool>;
}
