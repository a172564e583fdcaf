use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{FieldType, RepositoryError, Result, Value};
use crate::store::Item;

pub type Getter<E> = Arc<dyn Fn(&E) -> Value + Send + Sync>;
pub type Setter<E> = Arc<dyn Fn(&mut E, Value) -> Result<()> + Send + Sync>;

/// Typed accessor for one entity field.
pub struct FieldDescriptor<E> {
    name: String,
    field_type: FieldType,
    getter: Getter<E>,
    setter: Setter<E>,
}

impl<E> Clone for FieldDescriptor<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            field_type: self.field_type,
            getter: Arc::clone(&self.getter),
            setter: Arc::clone(&self.setter),
        }
    }
}

impl<E> fmt::Debug for FieldDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .finish()
    }
}

impl<E> FieldDescriptor<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn get(&self, entity: &E) -> Value {
        (self.getter)(entity)
    }

    /// Coerces to the declared type before handing the value to the setter.
    pub fn set(&self, entity: &mut E, value: Value) -> Result<()> {
        let coerced = self.field_type.coerce(value)?;
        (self.setter)(entity, coerced)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Shares the table hash key, alternate range key.
    Local,
    /// Own hash and range key.
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub kind: IndexKind,
    pub hash_field: String,
    pub range_field: String,
}

impl IndexDefinition {
    pub fn is_global(&self) -> bool {
        self.kind == IndexKind::Global
    }
}

/// Key attributes of one access path (table or index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShape {
    pub index_name: Option<String>,
    pub hash_field: String,
    pub range_field: Option<String>,
    pub global: bool,
}

/// Per-entity field map and key layout, built once and shared.
pub struct EntitySchema<E> {
    type_name: String,
    hash_key: String,
    range_key: Option<String>,
    pagination_index: Option<String>,
    indexes: BTreeMap<String, IndexDefinition>,
    fields: BTreeMap<String, FieldDescriptor<E>>,
    created_field: Option<String>,
    updated_field: Option<String>,
}

impl<E> fmt::Debug for EntitySchema<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("type_name", &self.type_name)
            .field("hash_key", &self.hash_key)
            .field("range_key", &self.range_key)
            .field("pagination_index", &self.pagination_index)
            .field("indexes", &self.indexes)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<E: 'static> EntitySchema<E> {
    pub fn builder(type_name: &str) -> EntitySchemaBuilder<E> {
        EntitySchemaBuilder::new(type_name)
    }
}

impl<E> EntitySchema<E> {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    pub fn range_key(&self) -> Option<&str> {
        self.range_key.as_deref()
    }

    pub fn has_range_key(&self) -> bool {
        self.range_key.is_some()
    }

    pub fn created_field(&self) -> Option<&str> {
        self.created_field.as_deref()
    }

    pub fn updated_field(&self) -> Option<&str> {
        self.updated_field.as_deref()
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.indexes.values()
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.get(name)
    }

    pub fn pagination_index(&self) -> Option<&IndexDefinition> {
        self.pagination_index
            .as_deref()
            .and_then(|name| self.indexes.get(name))
    }

    pub fn field(&self, name: &str) -> Result<&FieldDescriptor<E>> {
        self.fields
            .get(name)
            .ok_or_else(|| RepositoryError::FieldNotFound {
                entity: self.type_name.clone(),
                field: name.to_string(),
            })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn field_type(&self, name: &str) -> Result<FieldType> {
        self.field(name).map(FieldDescriptor::field_type)
    }

    pub fn get(&self, entity: &E, name: &str) -> Result<Value> {
        Ok(self.field(name)?.get(entity))
    }

    pub fn set(&self, entity: &mut E, name: &str, value: Value) -> Result<()> {
        self.field(name)?.set(entity, value)
    }

    /// Index that can order by `field`: local indexes first, then global.
    pub fn index_for_range_field(&self, field: &str) -> Option<&IndexDefinition> {
        let candidates: Vec<&IndexDefinition> = self
            .indexes
            .values()
            .filter(|idx| idx.range_field == field)
            .collect();
        candidates
            .iter()
            .find(|idx| !idx.is_global())
            .or_else(|| candidates.first())
            .copied()
    }

    pub fn key_shape(&self, index: Option<&str>) -> Result<KeyShape> {
        match index {
            None => Ok(self.table_shape()),
            Some(name) => {
                let idx = self.indexes.get(name).ok_or_else(|| {
                    RepositoryError::IllegalArgument(format!(
                        "Index '{}' is not declared on '{}'",
                        name, self.type_name
                    ))
                })?;
                Ok(KeyShape {
                    index_name: Some(idx.name.clone()),
                    hash_field: idx.hash_field.clone(),
                    range_field: Some(idx.range_field.clone()),
                    global: idx.is_global(),
                })
            }
        }
    }

    pub fn table_shape(&self) -> KeyShape {
        KeyShape {
            index_name: None,
            hash_field: self.hash_key.clone(),
            range_field: self.range_key.clone(),
            global: false,
        }
    }

    /// Shape used when no order-by is given: pagination index, else table.
    pub fn default_shape(&self) -> KeyShape {
        match self.pagination_index() {
            Some(idx) => KeyShape {
                index_name: Some(idx.name.clone()),
                hash_field: idx.hash_field.clone(),
                range_field: Some(idx.range_field.clone()),
                global: idx.is_global(),
            },
            None => self.table_shape(),
        }
    }

    pub fn hash_value(&self, entity: &E) -> Result<Value> {
        self.get(entity, &self.hash_key)
    }

    pub fn range_value(&self, entity: &E) -> Result<Option<Value>> {
        match &self.range_key {
            Some(range) => self.get(entity, range).map(Some),
            None => Ok(None),
        }
    }

    /// Store attributes for an entity. Null fields are left out.
    pub fn to_item(&self, entity: &E) -> Item {
        self.fields
            .iter()
            .map(|(name, field)| (name.clone(), field.get(entity)))
            .filter(|(_, value)| !value.is_null())
            .collect()
    }

    /// Rebuild an entity from store attributes; unknown attributes are
    /// skipped so projected and annotated items load alike.
    pub fn from_item(&self, item: &Item) -> Result<E>
    where
        E: Default,
    {
        let mut entity = E::default();
        for (name, value) in item {
            if let Some(field) = self.fields.get(name) {
                field.set(&mut entity, value.clone())?;
            }
        }
        Ok(entity)
    }

    pub fn json_of(&self, entity: &E, projections: &[String]) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .filter(|(name, _)| projections.is_empty() || projections.contains(name))
            .map(|(name, field)| (name.clone(), field.get(entity).to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

pub struct EntitySchemaBuilder<E> {
    type_name: String,
    hash_key: Option<String>,
    range_key: Option<String>,
    pagination_index: Option<String>,
    indexes: BTreeMap<String, IndexDefinition>,
    fields: BTreeMap<String, FieldDescriptor<E>>,
    embedded: BTreeMap<String, FieldDescriptor<E>>,
    created_field: Option<String>,
    updated_field: Option<String>,
}

impl<E: 'static> EntitySchemaBuilder<E> {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            hash_key: None,
            range_key: None,
            pagination_index: None,
            indexes: BTreeMap::new(),
            fields: BTreeMap::new(),
            embedded: BTreeMap::new(),
            created_field: None,
            updated_field: None,
        }
    }

    pub fn hash_key(mut self, field: &str) -> Self {
        self.hash_key = Some(field.to_string());
        self
    }

    pub fn range_key(mut self, field: &str) -> Self {
        self.range_key = Some(field.to_string());
        self
    }

    pub fn field<G, S>(mut self, name: &str, field_type: FieldType, getter: G, setter: S) -> Self
    where
        G: Fn(&E) -> Value + Send + Sync + 'static,
        S: Fn(&mut E, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.fields.insert(
            name.to_string(),
            FieldDescriptor {
                name: name.to_string(),
                field_type,
                getter: Arc::new(getter),
                setter: Arc::new(setter),
            },
        );
        self
    }

    /// Index sharing the table hash key, ordered by `range_field`.
    pub fn local_index(mut self, name: &str, range_field: &str) -> Self {
        self.indexes.insert(
            name.to_string(),
            IndexDefinition {
                name: name.to_string(),
                kind: IndexKind::Local,
                hash_field: String::new(),
                range_field: range_field.to_string(),
            },
        );
        self
    }

    pub fn global_index(mut self, name: &str, hash_field: &str, range_field: &str) -> Self {
        self.indexes.insert(
            name.to_string(),
            IndexDefinition {
                name: name.to_string(),
                kind: IndexKind::Global,
                hash_field: hash_field.to_string(),
                range_field: range_field.to_string(),
            },
        );
        self
    }

    /// Index walked by default when a listing carries no order-by.
    pub fn pagination_index(mut self, name: &str) -> Self {
        self.pagination_index = Some(name.to_string());
        self
    }

    pub fn timestamps(mut self, created_field: &str, updated_field: &str) -> Self {
        self.created_field = Some(created_field.to_string());
        self.updated_field = Some(updated_field.to_string());
        self
    }

    /// Flatten the fields of an embedded parent entity into this schema.
    /// Keys, indexes and timestamps not set here are taken from the parent.
    pub fn embed<P: 'static>(
        mut self,
        parent: &EntitySchema<P>,
        get: fn(&E) -> &P,
        get_mut: fn(&mut E) -> &mut P,
    ) -> Self {
        for (name, descriptor) in &parent.fields {
            let parent_getter = Arc::clone(&descriptor.getter);
            let parent_setter = Arc::clone(&descriptor.setter);
            self.embedded.insert(
                name.clone(),
                FieldDescriptor {
                    name: name.clone(),
                    field_type: descriptor.field_type,
                    getter: Arc::new(move |entity: &E| parent_getter(get(entity))),
                    setter: Arc::new(move |entity: &mut E, value| parent_setter(get_mut(entity), value)),
                },
            );
        }

        if self.hash_key.is_none() {
            self.hash_key = Some(parent.hash_key.clone());
        }
        if self.range_key.is_none() {
            self.range_key = parent.range_key.clone();
        }
        if self.pagination_index.is_none() {
            self.pagination_index = parent.pagination_index.clone();
        }
        if self.created_field.is_none() {
            self.created_field = parent.created_field.clone();
            self.updated_field = parent.updated_field.clone();
        }
        for (name, index) in &parent.indexes {
            self.indexes.entry(name.clone()).or_insert_with(|| index.clone());
        }
        self
    }

    pub fn build(self) -> Result<EntitySchema<E>> {
        let type_name = self.type_name;
        let invalid = |msg: String| RepositoryError::IllegalArgument(format!("{}: {}", type_name, msg));

        let mut fields = self.embedded;
        fields.extend(self.fields);

        let hash_key = self
            .hash_key
            .ok_or_else(|| invalid("a hash key is required".to_string()))?;

        let mut required = vec![hash_key.clone()];
        required.extend(self.range_key.iter().cloned());
        required.extend(self.created_field.iter().cloned());
        required.extend(self.updated_field.iter().cloned());

        let mut indexes = self.indexes;
        for index in indexes.values_mut() {
            if index.kind == IndexKind::Local {
                index.hash_field = hash_key.clone();
            }
            required.push(index.hash_field.clone());
            required.push(index.range_field.clone());
        }

        if let Some(missing) = required.iter().find(|name| !fields.contains_key(name.as_str())) {
            return Err(invalid(format!("field '{}' is referenced but not declared", missing)));
        }

        for timestamp in self.created_field.iter().chain(self.updated_field.iter()) {
            if fields.get(timestamp).map(FieldDescriptor::field_type) != Some(FieldType::Date) {
                return Err(invalid(format!("timestamp field '{}' must be a date", timestamp)));
            }
        }

        if let Some(pagination) = &self.pagination_index {
            match indexes.get(pagination) {
                Some(index) if !index.is_global() => {}
                Some(_) => return Err(invalid(format!("pagination index '{}' must be local", pagination))),
                None => return Err(invalid(format!("pagination index '{}' is not declared", pagination))),
            }
        }

        Ok(EntitySchema {
            type_name: type_name.clone(),
            hash_key,
            range_key: self.range_key,
            pagination_index: self.pagination_index,
            indexes,
            fields,
            created_field: self.created_field,
            updated_field: self.updated_field,
        })
    }
}
