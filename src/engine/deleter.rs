use log::{debug, info, warn};
use tracing::Instrument;

use super::context::{EngineContext, Identifiers};
use super::settle;
use super::writer::invalidate;
use crate::core::{RepositoryError, Result, Value};
use crate::schema::{ETAG_ATTRIBUTE, Entity};
use crate::store::{Expectation, Item, PrimaryKey};

pub struct Deleter<E: Entity> {
    ctx: EngineContext<E>,
}

impl<E: Entity> Deleter<E> {
    pub fn new(ctx: EngineContext<E>) -> Self {
        Self { ctx }
    }

    /// Delete every addressed record that exists. Each delete expects the
    /// etag it was loaded with. Any failure fails the batch with
    /// `BatchFailed`; the deletes that went through stay deleted and are
    /// purged from the cache first.
    pub async fn delete(&self, identifiers: &[Identifiers]) -> Result<Vec<E>> {
        let span = tracing::debug_span!("delete", entity = %self.ctx.type_name(), count = identifiers.len());
        async {
            let keys = identifiers
                .iter()
                .map(|ids| self.ctx.primary_key(ids))
                .collect::<Result<Vec<_>>>()?;
            let loaded = self.ctx.store.batch_load(&self.ctx.table, &keys, &[]).await?;
            let records = loaded
                .iter()
                .map(|item| self.ctx.load(item))
                .collect::<Result<Vec<_>>>()?;

            if records.len() < keys.len() {
                debug!("{} of {} records were already gone", keys.len() - records.len(), keys.len());
            }

            let settled = settle(records.into_iter().map(|record| self.delete_one(record))).await;
            let deleted = &settled.done;

            if !deleted.is_empty() {
                if let Err(e) = self.ctx.cache.purge_cache(deleted).await {
                    warn!("Cache purge failed for {} {} records: {}", deleted.len(), self.ctx.type_name(), e);
                }
                invalidate(&self.ctx, deleted).await;
            }
            info!("Deleted {} {} records", deleted.len(), self.ctx.type_name());
            settled.summarized()
        }
        .instrument(span)
        .await
    }

    async fn delete_one(&self, mut current: E) -> Result<E> {
        let key_id = current.etag_key_identifier()?;
        let key = self.ctx.primary_key_of(&current)?;
        let attempts = self.ctx.config.max_update_attempts;

        for attempt in 1..=attempts {
            let expectation = Expectation::Matches(expected_state(&self.ctx, &key, current.etag()));
            match self.ctx.store.conditional_delete(&self.ctx.table, &key, expectation).await {
                Ok(()) => return Ok(current),
                Err(e) if e.is_conflict() => {
                    debug!("Conflict deleting key='{}', attempt {} of {}", key_id, attempt, attempts);
                    if attempt == attempts {
                        break;
                    }
                    match self.ctx.store.get_item(&self.ctx.table, &key, true, &[]).await? {
                        Some(item) => current = self.ctx.load(&item)?,
                        // Someone else deleted it first.
                        None => return Ok(current),
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!("Giving up deleting key='{}' after {} attempts", key_id, attempts);
        Err(RepositoryError::RetryExhausted { key: key_id, attempts })
    }
}

fn expected_state<E: Entity>(ctx: &EngineContext<E>, key: &PrimaryKey, etag: Option<&str>) -> Item {
    let mut expected = Item::new();
    expected.insert(ctx.schema.hash_key().to_string(), key.hash.clone());
    if let (Some(field), Some(range)) = (ctx.schema.range_key(), key.range.as_ref()) {
        expected.insert(field.to_string(), range.clone());
    }
    if let Some(etag) = etag {
        expected.insert(ETAG_ATTRIBUTE.to_string(), Value::from(etag));
    }
    expected
}
