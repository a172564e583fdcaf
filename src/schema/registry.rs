use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::descriptor::EntitySchema;
use super::model::Keyed;
use crate::core::{RepositoryError, Result};

type AnySchema = Arc<dyn Any + Send + Sync>;

lazy_static::lazy_static! {
    // Append-only: entity shapes never change during the process lifetime.
    static ref SCHEMAS: RwLock<HashMap<TypeId, AnySchema>> = RwLock::new(HashMap::new());
}

/// Memoized schema lookup. The first caller for a type builds it through
/// `Keyed::describe`; concurrent first callers may both build, one wins.
pub fn schema_of<E: Keyed>() -> Result<Arc<EntitySchema<E>>> {
    let id = TypeId::of::<E>();

    if let Some(found) = SCHEMAS.read()?.get(&id) {
        return downcast(Arc::clone(found));
    }

    let built: AnySchema = Arc::new(E::describe()?);
    log::debug!("Registered schema for type '{}'", std::any::type_name::<E>());

    let mut guard = SCHEMAS.write()?;
    let entry = guard.entry(id).or_insert(built);
    downcast(Arc::clone(entry))
}

pub fn registered_schema_count() -> Result<usize> {
    Ok(SCHEMAS.read()?.len())
}

fn downcast<E: Keyed>(schema: AnySchema) -> Result<Arc<EntitySchema<E>>> {
    schema.downcast::<EntitySchema<E>>().map_err(|_| {
        RepositoryError::LockError(format!(
            "schema registry entry for '{}' has an unexpected type",
            std::any::type_name::<E>()
        ))
    })
}
