//! Backing store seam.
//!
//! Engines talk to a partitioned key-value store only through
//! [`BackingStore`]. [`InMemoryStore`] is the in-process implementation.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::core::{Result, Value};
use crate::query::{FilterExpression, KeyCondition};
use crate::schema::EntitySchema;

pub use memory::InMemoryStore;

/// Store-side attribute map of one record.
pub type Item = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKey {
    pub hash: Value,
    pub range: Option<Value>,
}

impl PrimaryKey {
    pub fn new(hash: impl Into<Value>, range: Option<Value>) -> Self {
        Self {
            hash: hash.into(),
            range,
        }
    }

    pub fn hash_only(hash: impl Into<Value>) -> Self {
        Self::new(hash, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescription {
    pub name: String,
    pub hash_field: String,
    pub range_field: String,
    pub global: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub hash_key: String,
    pub range_key: Option<String>,
    pub indexes: Vec<IndexDescription>,
}

impl TableDefinition {
    pub fn new(name: &str, hash_key: &str) -> Self {
        Self {
            name: name.to_string(),
            hash_key: hash_key.to_string(),
            range_key: None,
            indexes: Vec::new(),
        }
    }

    pub fn with_range_key(mut self, range_key: &str) -> Self {
        self.range_key = Some(range_key.to_string());
        self
    }

    pub fn with_local_index(mut self, name: &str, range_field: &str) -> Self {
        let hash_field = self.hash_key.clone();
        self.indexes.push(IndexDescription {
            name: name.to_string(),
            hash_field,
            range_field: range_field.to_string(),
            global: false,
        });
        self
    }

    pub fn with_global_index(mut self, name: &str, hash_field: &str, range_field: &str) -> Self {
        self.indexes.push(IndexDescription {
            name: name.to_string(),
            hash_field: hash_field.to_string(),
            range_field: range_field.to_string(),
            global: true,
        });
        self
    }

    /// Table layout matching an entity schema.
    pub fn from_schema<E>(name: &str, schema: &EntitySchema<E>) -> Self {
        let mut definition = Self::new(name, schema.hash_key());
        definition.range_key = schema.range_key().map(str::to_string);
        definition.indexes = schema
            .indexes()
            .map(|idx| IndexDescription {
                name: idx.name.clone(),
                hash_field: idx.hash_field.clone(),
                range_field: idx.range_field.clone(),
                global: idx.is_global(),
            })
            .collect();
        definition
    }

    pub fn index(&self, name: &str) -> Option<&IndexDescription> {
        self.indexes.iter().find(|idx| idx.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub index_name: Option<String>,
    /// Hash attribute of the queried path and its value.
    pub hash_field: String,
    pub hash_value: Value,
    pub key_condition: Option<KeyCondition>,
    pub filter: Option<FilterExpression>,
    pub scan_forward: bool,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    pub projections: Vec<String>,
    pub consistent_read: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub filter: Option<FilterExpression>,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    pub projections: Vec<String>,
    /// `(segment, total_segments)`
    pub segment: Option<(usize, usize)>,
    pub consistent_read: bool,
}

/// One page of a query or scan.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
    pub count: usize,
    pub scanned_count: usize,
}

/// Precondition of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// No record with the key may exist.
    NotExists,
    /// The stored record must carry these attribute values.
    Matches(Item),
}

#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn get_item(
        &self,
        table: &str,
        key: &PrimaryKey,
        consistent_read: bool,
        projections: &[String],
    ) -> Result<Option<Item>>;

    async fn query(&self, table: &str, request: QueryRequest) -> Result<Page>;

    async fn scan(&self, table: &str, request: ScanRequest) -> Result<Page>;

    /// Scan every segment to exhaustion and merge the results.
    async fn parallel_scan(&self, table: &str, request: ScanRequest, segments: usize) -> Result<Vec<Item>> {
        let total = segments.max(1);
        let scans = (0..total).map(|segment| {
            let mut request = request.clone();
            request.segment = Some((segment, total));
            request.limit = None;
            async move {
                let mut items = Vec::new();
                loop {
                    let page = self.scan(table, request.clone()).await?;
                    items.extend(page.items);
                    match page.last_evaluated_key {
                        Some(key) => request.exclusive_start_key = Some(key),
                        None => break,
                    }
                }
                Ok::<_, crate::core::RepositoryError>(items)
            }
        });

        Ok(try_join_all(scans).await?.into_iter().flatten().collect())
    }

    /// Existing records among `keys`; order is unspecified.
    async fn batch_load(&self, table: &str, keys: &[PrimaryKey], projections: &[String]) -> Result<Vec<Item>>;

    async fn conditional_put(&self, table: &str, item: Item, expectation: Expectation) -> Result<()>;

    async fn conditional_delete(&self, table: &str, key: &PrimaryKey, expectation: Expectation) -> Result<()>;

    async fn describe_indexes(&self, table: &str) -> Result<Vec<IndexDescription>>;
}
