use std::sync::Arc;

use log::info;

use crate::cache::{CacheManager, LocalCacheManager};
use crate::config::RepositoryConfig;
use crate::core::Result;
use crate::engine::{
    Aggregator, AggregationResult, Deleter, EngineContext, Identifiers, ItemListResult, ItemResult, Reader,
    Updater, Writer,
};
use crate::etag::{ETagManager, InMemoryETagManager};
use crate::query::{QueryMap, QueryPack, build_query_pack};
use crate::schema::{Entity, EntitySchema};
use crate::store::{BackingStore, InMemoryStore, TableDefinition};

/// Repository of one entity type.
///
/// Wires the schema, the backing store, the caches and the etag manager
/// into the read, write and aggregation engines. Cheap to share behind an
/// `Arc`; every method takes `&self`.
pub struct Repository<E: Entity> {
    ctx: EngineContext<E>,
    reader: Reader<E>,
    writer: Writer<E>,
    deleter: Deleter<E>,
    updater: Updater<E>,
    aggregator: Aggregator<E>,
}

impl<E: Entity> Repository<E> {
    /// Repository over caller-supplied collaborators.
    pub fn new(
        table: &str,
        store: Arc<dyn BackingStore>,
        cache: Arc<dyn CacheManager<E>>,
        etags: Arc<dyn ETagManager>,
        config: RepositoryConfig,
    ) -> Result<Self> {
        let ctx = EngineContext {
            schema: E::schema()?,
            store,
            cache,
            etags,
            config,
            table: table.to_string(),
        };
        Ok(Self {
            reader: Reader::new(ctx.clone()),
            writer: Writer::new(ctx.clone()),
            deleter: Deleter::new(ctx.clone()),
            updater: Updater::new(ctx.clone()),
            aggregator: Aggregator::new(ctx.clone()),
            ctx,
        })
    }

    /// Repository over `store` with process-local caches and etags.
    pub fn with_store(table: &str, store: Arc<dyn BackingStore>, config: RepositoryConfig) -> Result<Self> {
        let schema = E::schema()?;
        let cache: Arc<dyn CacheManager<E>> = Arc::new(LocalCacheManager::new(&config));
        let etags: Arc<dyn ETagManager> = Arc::new(InMemoryETagManager::new(schema.type_name()));
        Self::new(table, store, cache, etags, config)
    }

    /// Self-contained repository: a fresh in-memory store holding one table
    /// laid out after the entity schema.
    pub async fn in_memory(config: RepositoryConfig) -> Result<Self> {
        let schema = E::schema()?;
        let table = schema.type_name().to_string();
        let store = InMemoryStore::new();
        store.create_table(TableDefinition::from_schema(&table, &schema)).await?;
        info!("Created in-memory table '{}'", table);
        Self::with_store(&table, Arc::new(store), config)
    }

    pub fn schema(&self) -> &EntitySchema<E> {
        &self.ctx.schema
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.ctx.config
    }

    /// Compile a raw query map into a validated pack.
    pub fn query_pack(&self, route: &str, query: &QueryMap, request_etag: Option<&str>) -> Result<QueryPack> {
        build_query_pack(&self.ctx.schema, &self.ctx.config, route, query, request_etag)
    }

    pub async fn create(&self, records: Vec<E>) -> Result<Vec<E>> {
        self.writer.create(records).await
    }

    pub async fn read(&self, identifiers: &Identifiers, consistent: bool, projections: &[String]) -> Result<ItemResult<E>> {
        self.reader.read(identifiers, consistent, projections).await
    }

    /// One read per identifier, in order.
    pub async fn batch_read(&self, identifiers: &[Identifiers], projections: &[String]) -> Result<Vec<ItemResult<E>>> {
        self.reader.batch_read(identifiers, projections).await
    }

    pub async fn read_all(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<ItemListResult<E>> {
        self.reader.read_all(identifiers, pack).await
    }

    pub async fn read_all_without_pagination(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<Vec<E>> {
        self.reader.read_all_without_pagination(identifiers, pack).await
    }

    pub async fn update<F>(&self, record: E, update_fn: F) -> Result<E>
    where
        F: Fn(&mut E) -> Result<()> + Send + Sync,
    {
        self.writer.update(record, update_fn).await
    }

    pub async fn update_many<F>(&self, records: Vec<E>, update_fn: F) -> Result<Vec<E>>
    where
        F: Fn(&mut E) -> Result<()> + Send + Sync,
    {
        self.writer.update_many(records, update_fn).await
    }

    pub async fn delete(&self, identifiers: &[Identifiers]) -> Result<Vec<E>> {
        self.deleter.delete(identifiers).await
    }

    pub async fn increment_field(&self, record: E, field: &str, amount: f64) -> Result<E> {
        self.updater.increment_field(record, field, amount).await
    }

    pub async fn decrement_field(&self, record: E, field: &str, amount: f64) -> Result<E> {
        self.updater.decrement_field(record, field, amount).await
    }

    pub async fn aggregation(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<AggregationResult> {
        self.aggregator.aggregation(identifiers, pack).await
    }

    /// Conditional-response check for a single record.
    pub async fn item_etag_matches(&self, identifiers: &Identifiers, etag: &str) -> Result<bool> {
        self.reader.item_etag_matches(identifiers, etag).await
    }

    /// Conditional-response check for a listing, using the pack's request etag.
    pub async fn list_etag_matches(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<bool> {
        self.reader.list_etag_matches(identifiers, pack).await
    }

    pub async fn aggregation_etag_matches(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<bool> {
        self.aggregator.aggregation_etag_matches(identifiers, pack).await
    }
}
