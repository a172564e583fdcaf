use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;

use super::{ETagManager, OBJECT_ETAG_MAP};
use crate::core::Result;
use crate::engine::keys;

/// Process-local etag maps, one named map per key base.
pub struct InMemoryETagManager {
    type_name: String,
    maps: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryETagManager {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            maps: Mutex::new(HashMap::new()),
        }
    }

    fn put(&self, map: &str, key: &str, etag: &str) -> Result<()> {
        self.maps
            .lock()?
            .entry(map.to_string())
            .or_default()
            .insert(key.to_string(), etag.to_string());
        Ok(())
    }

    fn matches(&self, map: &str, key: &str, etag: &str) -> Result<bool> {
        let maps = self.maps.lock()?;
        Ok(maps
            .get(map)
            .and_then(|entries| entries.get(key))
            .is_some_and(|stored| stored == etag))
    }

    fn clear(&self, map: &str) -> Result<()> {
        if self.maps.lock()?.remove(map).is_some() {
            debug!("Cleared etag map '{}'", map);
        }
        Ok(())
    }
}

#[async_trait]
impl ETagManager for InMemoryETagManager {
    async fn set_single_record_etag(&self, etags: &BTreeMap<String, String>) -> Result<()> {
        let mut maps = self.maps.lock()?;
        let objects = maps.entry(OBJECT_ETAG_MAP.to_string()).or_default();
        for (key, etag) in etags {
            objects.insert(key.clone(), etag.clone());
        }
        Ok(())
    }

    async fn set_projection_etags(&self, projections: &[String], hash: &str, etag: &str) -> Result<()> {
        if projections.is_empty() {
            return Ok(());
        }
        let base = keys::projection_etag_base(&self.type_name, hash);
        let key = keys::projection_etag_key(&self.type_name, hash, projections);
        self.put(&base, &key, etag)
    }

    async fn remove_projections_etags(&self, hash: &str) -> Result<()> {
        self.clear(&keys::projection_etag_base(&self.type_name, hash))
    }

    async fn set_item_list_etags(&self, list_key: &str, etag_key: &str, etag: &str) -> Result<()> {
        self.put(list_key, etag_key, etag)
    }

    async fn replace_aggregation_etag(&self, list_key: &str, etag_key: &str, etag: &str) -> Result<()> {
        self.put(list_key, etag_key, etag)
    }

    async fn destroy_etags(&self, scope: &str) -> Result<()> {
        self.clear(&keys::item_list_etags_key(&self.type_name, scope))
    }

    async fn check_item_etag(&self, key_base: &str, key: &str, etag: &str) -> Result<bool> {
        self.matches(key_base, key, etag)
    }

    async fn check_item_list_etag(&self, list_key: &str, etag_key: &str, etag: &str) -> Result<bool> {
        self.matches(list_key, etag_key, etag)
    }

    async fn check_aggregation_etag(&self, list_key: &str, etag_key: &str, etag: &str) -> Result<bool> {
        self.matches(list_key, etag_key, etag)
    }
}
