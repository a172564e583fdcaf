use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use log::{debug, info, warn};
use tracing::Instrument;

use super::context::{EngineContext, Identifiers};
use super::settle;
use super::keys;
use crate::core::{RepositoryError, Result, Value};
use crate::schema::{ETAG_ATTRIBUTE, Entity};
use crate::store::{Expectation, Item};

/// Creates and updates records. Every write that went through has its
/// cache entries replaced and etag scopes invalidated before the call
/// returns, even when other writes of the same batch failed.
pub struct Writer<E: Entity> {
    ctx: EngineContext<E>,
}

impl<E: Entity> Writer<E> {
    pub fn new(ctx: EngineContext<E>) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, records: Vec<E>) -> Result<Vec<E>> {
        let span = tracing::debug_span!("create", entity = %self.ctx.type_name(), count = records.len());
        async {
            let settled = settle(records.into_iter().map(|record| self.create_one(record))).await;
            after_write(&self.ctx, &settled.done).await;
            info!("Created {} {} records", settled.done.len(), self.ctx.type_name());
            settled.first_failure()
        }
        .instrument(span)
        .await
    }

    async fn create_one(&self, mut record: E) -> Result<E> {
        let now = Value::Date(Utc::now());
        if let Some(field) = self.ctx.schema.created_field() {
            self.ctx.schema.set(&mut record, field, now.clone())?;
        }
        if let Some(field) = self.ctx.schema.updated_field() {
            self.ctx.schema.set(&mut record, field, now)?;
        }
        record.generate_etag()?;

        let item = self.ctx.item_of(&record);
        self.ctx
            .store
            .conditional_put(&self.ctx.table, item, Expectation::NotExists)
            .await?;
        Ok(record)
    }

    /// Apply `update_fn` to `record` and write it back, expecting the etag
    /// the record was read with. A lost race re-reads the record and tries
    /// again, up to `max_update_attempts` writes in total.
    pub async fn update<F>(&self, record: E, update_fn: F) -> Result<E>
    where
        F: Fn(&mut E) -> Result<()> + Send + Sync,
    {
        let key_id = record.etag_key_identifier()?;
        let span = tracing::debug_span!("update", key = %key_id);
        async {
            let updated = self.update_one(record, &update_fn).await?;
            after_write(&self.ctx, std::slice::from_ref(&updated)).await;
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    /// Update every record with the same function. Any failure fails the
    /// batch with `BatchFailed`; the updates that succeeded stay written.
    pub async fn update_many<F>(&self, records: Vec<E>, update_fn: F) -> Result<Vec<E>>
    where
        F: Fn(&mut E) -> Result<()> + Send + Sync,
    {
        let settled = settle(records.into_iter().map(|record| self.update_one(record, &update_fn))).await;
        after_write(&self.ctx, &settled.done).await;
        settled.summarized()
    }

    async fn update_one<F>(&self, mut current: E, update_fn: &F) -> Result<E>
    where
        F: Fn(&mut E) -> Result<()> + Send + Sync,
    {
        let key_id = current.etag_key_identifier()?;
        let attempts = self.ctx.config.max_update_attempts;

        for attempt in 1..=attempts {
            let expected = current.etag().map(str::to_string);
            let mut next = current.clone();
            update_fn(&mut next)?;
            if let Some(field) = self.ctx.schema.updated_field() {
                self.ctx.schema.set(&mut next, field, Value::Date(Utc::now()))?;
            }
            next.generate_etag()?;

            let expectation = Expectation::Matches(self.expectation_of(&current, expected)?);
            match self
                .ctx
                .store
                .conditional_put(&self.ctx.table, self.ctx.item_of(&next), expectation)
                .await
            {
                Ok(()) => {
                    debug!("Updated key='{}' on attempt {}", key_id, attempt);
                    return Ok(next);
                }
                Err(e) if e.is_conflict() => {
                    debug!("Conflict on key='{}', attempt {} of {}", key_id, attempt, attempts);
                    if attempt < attempts {
                        current = self.refetch(&current).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!("Giving up on key='{}' after {} attempts", key_id, attempts);
        Err(RepositoryError::RetryExhausted { key: key_id, attempts })
    }

    /// Keys plus the etag the stored record must still carry.
    fn expectation_of(&self, record: &E, etag: Option<String>) -> Result<Item> {
        let key = self.ctx.primary_key_of(record)?;
        let mut expected = Item::new();
        expected.insert(self.ctx.schema.hash_key().to_string(), key.hash);
        if let (Some(field), Some(range)) = (self.ctx.schema.range_key(), key.range) {
            expected.insert(field.to_string(), range);
        }
        if let Some(etag) = etag {
            expected.insert(ETAG_ATTRIBUTE.to_string(), Value::Text(etag));
        }
        Ok(expected)
    }

    async fn refetch(&self, record: &E) -> Result<E> {
        let key = self.ctx.primary_key_of(record)?;
        let item = self
            .ctx
            .store
            .get_item(&self.ctx.table, &key, true, &[])
            .await?
            .ok_or_else(|| RepositoryError::NotFound(record.etag_key_identifier().unwrap_or_default()))?;
        self.ctx.load(&item)
    }
}

/// Listing scopes a record appears in: its hash, the root, and one per
/// global index it carries a value for.
pub(crate) fn scopes_of<E: Entity>(ctx: &EngineContext<E>, record: &E) -> Result<BTreeSet<String>> {
    let hash = record.hash_value()?.to_string();
    let mut scopes = BTreeSet::from([
        Identifiers::hash(hash.as_str()).scope(),
        Identifiers::root().scope(),
    ]);
    for index in ctx.schema.indexes().filter(|idx| idx.is_global()) {
        let value = ctx.schema.get(record, &index.hash_field)?;
        if !value.is_null() {
            scopes.insert(keys::list_scope(Some(&value.to_string()), Some(&index.name)));
        }
    }
    Ok(scopes)
}

/// Cache replacement, fresh record etags and listing invalidation after
/// creates and updates. Failures are logged; the writes already happened.
pub(crate) async fn after_write<E: Entity>(ctx: &EngineContext<E>, records: &[E]) {
    if records.is_empty() {
        return;
    }
    if let Err(e) = ctx.cache.replace_cache(records).await {
        warn!("Cache replacement failed for {} {} records: {}", records.len(), ctx.type_name(), e);
    }

    let etags = records
        .iter()
        .filter_map(|record| {
            let etag = record.etag()?.to_string();
            Some(record.etag_key_identifier().map(|key| (key, etag)))
        })
        .collect::<Result<BTreeMap<_, _>>>();
    match etags {
        Ok(etags) => {
            if let Err(e) = ctx.etags.set_single_record_etag(&etags).await {
                warn!("Setting record etags failed for {} keys: {}", etags.len(), e);
            }
        }
        Err(e) => warn!("Could not key record etags: {}", e),
    }

    invalidate(ctx, records).await;
}

/// Drop projection etags of every touched hash and list etags of every
/// listing scope the records appear in.
pub(crate) async fn invalidate<E: Entity>(ctx: &EngineContext<E>, records: &[E]) {
    let mut hashes = BTreeSet::new();
    let mut scopes = BTreeSet::new();
    for record in records {
        match record.hash_value().and_then(|hash| Ok((hash, scopes_of(ctx, record)?))) {
            Ok((hash, record_scopes)) => {
                hashes.insert(hash.to_string());
                scopes.extend(record_scopes);
            }
            Err(e) => warn!("Could not resolve etag scopes of a {} record: {}", ctx.type_name(), e),
        }
    }
    for hash in &hashes {
        if let Err(e) = ctx.etags.remove_projections_etags(hash).await {
            warn!("Removing projection etags failed for hash='{}': {}", hash, e);
        }
    }
    for scope in &scopes {
        if let Err(e) = ctx.etags.destroy_etags(scope).await {
            warn!("Destroying etags failed for scope='{}': {}", scope, e);
        }
    }
    debug!("Invalidated {} etag scopes", scopes.len());
}
