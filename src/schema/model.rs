use std::fmt;
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use super::descriptor::EntitySchema;
use super::registry::schema_of;
use crate::core::{Result, Value};
use crate::engine::keys;
use crate::etag::new_etag;

/// Store attribute carrying a record's etag.
pub const ETAG_ATTRIBUTE: &str = "etag";

/// Identity capability: the entity describes its schema once and exposes
/// its hash/range key values through it.
pub trait Keyed: Sized + Send + Sync + 'static {
    fn describe() -> Result<EntitySchema<Self>>;

    fn schema() -> Result<Arc<EntitySchema<Self>>> {
        schema_of::<Self>()
    }

    fn hash_value(&self) -> Result<Value> {
        Self::schema()?.hash_value(self)
    }

    fn range_value(&self) -> Result<Option<Value>> {
        Self::schema()?.range_value(self)
    }
}

/// Projected JSON form of an entity.
pub trait Serializable: Keyed {
    fn to_json_format(&self, projections: &[String]) -> Result<serde_json::Value> {
        Ok(Self::schema()?.json_of(self, projections))
    }
}

/// Content-hash capability.
pub trait ETaggable: Serializable {
    fn etag(&self) -> Option<&str>;

    fn set_etag(&mut self, etag: String);

    /// Recompute the etag from the unprojected JSON form and store it.
    fn generate_etag(&mut self) -> Result<String> {
        let content = self.to_json_format(&[])?.to_string();
        let etag = new_etag(xxh3_64(content.as_bytes()));
        self.set_etag(etag.clone());
        Ok(etag)
    }

    /// `{Type}_{hash}[/{range}]`, the key of this record's single etag.
    fn etag_key_identifier(&self) -> Result<String> {
        let schema = Self::schema()?;
        let hash = schema.hash_value(self)?;
        let range = schema.range_value(self)?;
        Ok(keys::object_cache_id(
            schema.type_name(),
            &hash.to_string(),
            range.map(|r| r.to_string()).as_deref(),
        ))
    }

    /// JSON form handed to callers: projected fields plus the etag.
    fn to_document(&self, projections: &[String]) -> Result<serde_json::Value> {
        let mut json = self.to_json_format(projections)?;
        if let (Some(map), Some(etag)) = (json.as_object_mut(), self.etag()) {
            map.insert(ETAG_ATTRIBUTE.to_string(), serde_json::Value::String(etag.to_string()));
        }
        Ok(json)
    }
}

/// Everything the engines require of a stored type.
pub trait Entity: Keyed + Serializable + ETaggable + Clone + Default + fmt::Debug {}

impl<T> Entity for T where T: Keyed + Serializable + ETaggable + Clone + Default + fmt::Debug {}
