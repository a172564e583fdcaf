// ============================================================================
// memorepo Library
// ============================================================================

//! Generic repository engine over hash/range keyed stores.
//!
//! A [`Repository`] translates declarative requests (filters, ordering,
//! projections, page tokens, aggregations) into key queries and scans
//! against a [`BackingStore`], guards writes with etag-based optimistic
//! locking, and keeps a read-through cache and conditional-response etags
//! coherent around every call.

pub mod cache;
pub mod config;
pub mod core;
pub mod engine;
pub mod etag;
pub mod pagination;
pub mod query;
pub mod repository;
pub mod schema;
pub mod store;

// Re-export main types for convenience
pub use cache::{CacheManager, LocalCacheManager};
pub use config::RepositoryConfig;
pub use core::{FieldType, RepositoryError, Result, ValidationErrors, Value};
pub use engine::{AggregationResult, Identifiers, ItemList, ItemListMeta, ItemListResult, ItemResult};
pub use etag::{ETagManager, InMemoryETagManager};
pub use pagination::{END_OF_LIST, PageTokens};
pub use query::{
    AggregateFunction, AggregateFunctions, DateUnit, FilterParameter, GroupingConfiguration, OrderByParameter,
    QueryMap, QueryPack, SortDirection,
};
pub use repository::Repository;
pub use schema::{ETaggable, Entity, EntitySchema, Keyed, Serializable};
pub use store::{BackingStore, InMemoryStore, Item, PrimaryKey, TableDefinition};
