use std::sync::Arc;

use crate::cache::CacheManager;
use crate::config::RepositoryConfig;
use crate::core::{RepositoryError, Result, Value};
use crate::etag::ETagManager;
use crate::schema::{ETAG_ATTRIBUTE, Entity, EntitySchema};
use crate::store::{BackingStore, Item, PrimaryKey};

use super::keys;

/// Address of a record or a listing: a hash value, optionally a range
/// value, optionally the global index the hash belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identifiers {
    pub hash: Option<String>,
    pub range: Option<String>,
    pub gsi: Option<String>,
}

impl Identifiers {
    /// Listing over every hash.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn hash(hash: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            ..Default::default()
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    pub fn with_gsi(mut self, index: impl Into<String>) -> Self {
        self.gsi = Some(index.into());
        self
    }

    pub fn is_root(&self) -> bool {
        self.hash.is_none()
    }

    pub fn scope(&self) -> String {
        keys::list_scope(self.hash.as_deref(), self.gsi.as_deref())
    }
}

/// Collaborators shared by every engine of one entity type.
pub struct EngineContext<E: Entity> {
    pub schema: Arc<EntitySchema<E>>,
    pub store: Arc<dyn BackingStore>,
    pub cache: Arc<dyn CacheManager<E>>,
    pub etags: Arc<dyn ETagManager>,
    pub config: RepositoryConfig,
    pub table: String,
}

impl<E: Entity> Clone for EngineContext<E> {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            etags: Arc::clone(&self.etags),
            config: self.config.clone(),
            table: self.table.clone(),
        }
    }
}

impl<E: Entity> EngineContext<E> {
    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    /// Typed table key from string identifiers.
    pub fn primary_key(&self, identifiers: &Identifiers) -> Result<PrimaryKey> {
        let hash = identifiers
            .hash
            .as_deref()
            .ok_or_else(|| RepositoryError::IllegalArgument("A hash identifier is required".to_string()))?;
        let hash = self.schema.field_type(self.schema.hash_key())?.coerce_str(hash)?;
        let range = match (self.schema.range_key(), identifiers.range.as_deref()) {
            (Some(field), Some(raw)) => Some(self.schema.field_type(field)?.coerce_str(raw)?),
            _ => None,
        };
        Ok(PrimaryKey { hash, range })
    }

    pub fn primary_key_of(&self, record: &E) -> Result<PrimaryKey> {
        Ok(PrimaryKey {
            hash: self.schema.hash_value(record)?,
            range: self.schema.range_value(record)?,
        })
    }

    /// Hash value typed for the given access path.
    pub fn typed_hash(&self, field: &str, raw: &str) -> Result<Value> {
        self.schema.field_type(field)?.coerce_str(raw)
    }

    /// Load a store item into an entity, carrying the persisted etag.
    pub fn load(&self, item: &Item) -> Result<E> {
        let mut entity = self.schema.from_item(item)?;
        if let Some(etag) = item.get(ETAG_ATTRIBUTE).and_then(Value::as_str) {
            entity.set_etag(etag.to_string());
        }
        Ok(entity)
    }

    /// Store item of an entity including its etag.
    pub fn item_of(&self, entity: &E) -> Item {
        let mut item = self.schema.to_item(entity);
        if let Some(etag) = entity.etag() {
            item.insert(ETAG_ATTRIBUTE.to_string(), Value::from(etag));
        }
        item
    }
}
