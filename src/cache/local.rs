use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use lru::LruCache;

use super::CacheManager;
use crate::config::RepositoryConfig;
use crate::core::Result;
use crate::engine::keys;
use crate::engine::results::ItemList;
use crate::schema::Entity;

fn bounded<V>(capacity: usize) -> Mutex<LruCache<String, V>> {
    let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
    Mutex::new(LruCache::new(capacity))
}

/// LRU-bounded in-process caches for one entity type.
pub struct LocalCacheManager<E> {
    objects: Mutex<LruCache<String, E>>,
    item_lists: Mutex<LruCache<String, ItemList<E>>>,
    aggregations: Mutex<LruCache<String, String>>,
}

impl<E: Entity> LocalCacheManager<E> {
    pub fn new(config: &RepositoryConfig) -> Self {
        Self {
            objects: bounded(config.object_cache_capacity),
            item_lists: bounded(config.item_list_cache_capacity),
            aggregations: bounded(config.aggregation_cache_capacity),
        }
    }

    fn ids_of(record: &E) -> Result<(String, String)> {
        let schema = E::schema()?;
        let full = record.etag_key_identifier()?;
        let short = keys::short_cache_id(schema.type_name(), &record.hash_value()?.to_string());
        Ok((full, short))
    }

    fn drop_listings(&self) -> Result<()> {
        self.item_lists.lock()?.clear();
        self.aggregations.lock()?.clear();
        Ok(())
    }

    /// Remove an id and every projection narrowed from it.
    fn forget(objects: &mut LruCache<String, E>, id: &str) {
        let prefix = format!("{}/projection/", id);
        let stale: Vec<String> = objects
            .iter()
            .map(|(key, _)| key)
            .filter(|key| key.as_str() == id || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in stale {
            objects.pop(&key);
        }
    }
}

#[async_trait]
impl<E: Entity> CacheManager<E> for LocalCacheManager<E> {
    async fn check_object_cache(&self, id: &str) -> Result<Option<E>> {
        Ok(self.objects.lock()?.get(id).cloned())
    }

    async fn replace_object_cache(&self, id: &str, item: &E) -> Result<()> {
        self.objects.lock()?.put(id.to_string(), item.clone());
        Ok(())
    }

    async fn check_item_list_cache(&self, id: &str) -> Result<Option<ItemList<E>>> {
        Ok(self.item_lists.lock()?.get(id).cloned())
    }

    async fn replace_item_list_cache(&self, id: &str, list: &ItemList<E>) -> Result<()> {
        self.item_lists.lock()?.put(id.to_string(), list.clone());
        Ok(())
    }

    async fn check_aggregation_cache(&self, key: &str) -> Result<Option<String>> {
        Ok(self.aggregations.lock()?.get(key).cloned())
    }

    async fn replace_aggregation_cache(&self, key: &str, content: &str) -> Result<()> {
        self.aggregations.lock()?.put(key.to_string(), content.to_string());
        Ok(())
    }

    async fn replace_cache(&self, records: &[E]) -> Result<()> {
        let ids = records.iter().map(Self::ids_of).collect::<Result<Vec<_>>>()?;
        {
            let mut objects = self.objects.lock()?;
            for ((full, short), record) in ids.iter().zip(records) {
                Self::forget(&mut objects, full);
                // A ranged record is only one of the candidates a hash-only
                // lookup may resolve to; let the next lookup ask the store.
                if short != full {
                    Self::forget(&mut objects, short);
                }
                objects.put(full.clone(), record.clone());
            }
        }
        debug!("Replaced {} cached records", records.len());
        self.drop_listings()
    }

    async fn purge_cache(&self, records: &[E]) -> Result<()> {
        let ids = records.iter().map(Self::ids_of).collect::<Result<Vec<_>>>()?;
        {
            let mut objects = self.objects.lock()?;
            for (full, short) in &ids {
                Self::forget(&mut objects, full);
                Self::forget(&mut objects, short);
            }
        }
        debug!("Purged {} cached records", records.len());
        self.drop_listings()
    }
}
