//! Read-through caches for records, listings and aggregations.
//!
//! Read paths treat a cache failure as a miss; write paths await cache
//! replacement before acknowledging.

pub mod local;

use async_trait::async_trait;

use crate::core::Result;
use crate::engine::results::ItemList;
use crate::schema::Entity;

pub use local::LocalCacheManager;

#[async_trait]
pub trait CacheManager<E: Entity>: Send + Sync {
    async fn check_object_cache(&self, id: &str) -> Result<Option<E>>;

    async fn replace_object_cache(&self, id: &str, item: &E) -> Result<()>;

    async fn check_item_list_cache(&self, id: &str) -> Result<Option<ItemList<E>>>;

    async fn replace_item_list_cache(&self, id: &str, list: &ItemList<E>) -> Result<()>;

    async fn check_aggregation_cache(&self, key: &str) -> Result<Option<String>>;

    async fn replace_aggregation_cache(&self, key: &str, content: &str) -> Result<()>;

    /// Store written records under their full ids, evict the hash-only ids
    /// of ranged records, and drop every listing and aggregation of the type.
    async fn replace_cache(&self, records: &[E]) -> Result<()>;

    /// Forget deleted records and every listing and aggregation of the type.
    async fn purge_cache(&self, records: &[E]) -> Result<()>;

    fn is_object_cache_available(&self) -> bool {
        true
    }

    fn is_item_list_cache_available(&self) -> bool {
        true
    }

    fn is_aggregation_cache_available(&self) -> bool {
        true
    }
}
