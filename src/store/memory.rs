use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;

use super::{BackingStore, Expectation, IndexDescription, Item, Page, PrimaryKey, QueryRequest, ScanRequest, TableDefinition};
use crate::core::{RepositoryError, Result, Value};

struct Table {
    definition: TableDefinition,
    /// Keyed by the encoded primary key, which is also the scan order.
    items: BTreeMap<String, Item>,
}

impl Table {
    fn primary_key_of(&self, item: &Item) -> Result<PrimaryKey> {
        let def = &self.definition;
        let hash = item
            .get(&def.hash_key)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| {
                RepositoryError::IllegalArgument(format!(
                    "Item is missing hash key '{}' of table '{}'",
                    def.hash_key, def.name
                ))
            })?;
        let range = match &def.range_key {
            Some(range_key) => Some(item.get(range_key).filter(|v| !v.is_null()).cloned().ok_or_else(|| {
                RepositoryError::IllegalArgument(format!(
                    "Item is missing range key '{}' of table '{}'",
                    range_key, def.name
                ))
            })?),
            None => None,
        };
        Ok(PrimaryKey { hash, range })
    }

    /// Key attributes of the table and, when given, of the index.
    fn key_attributes(&self, index: Option<&IndexDescription>, item: &Item) -> Item {
        let def = &self.definition;
        let mut fields = vec![def.hash_key.as_str()];
        fields.extend(def.range_key.as_deref());
        if let Some(idx) = index {
            fields.push(idx.hash_field.as_str());
            fields.push(idx.range_field.as_str());
        }
        fields
            .into_iter()
            .filter_map(|f| item.get(f).map(|v| (f.to_string(), v.clone())))
            .collect()
    }

    fn check(&self, encoded: &str, expectation: &Expectation) -> Result<()> {
        let existing = self.items.get(encoded);
        match (expectation, existing) {
            (Expectation::NotExists, None) => Ok(()),
            (Expectation::NotExists, Some(_)) => Err(RepositoryError::Conflict(format!(
                "Record '{}' already exists in '{}'",
                encoded, self.definition.name
            ))),
            (Expectation::Matches(_), None) => Err(RepositoryError::Conflict(format!(
                "Record '{}' no longer exists in '{}'",
                encoded, self.definition.name
            ))),
            (Expectation::Matches(expected), Some(current)) => {
                let stale = expected
                    .iter()
                    .any(|(name, value)| current.get(name).is_none_or(|v| v != value));
                if stale {
                    Err(RepositoryError::Conflict(format!(
                        "Record '{}' in '{}' was modified concurrently",
                        encoded, self.definition.name
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn encode_key(key: &PrimaryKey) -> String {
    match &key.range {
        Some(range) => format!("{}\u{1f}{}", key.hash, range),
        None => key.hash.to_string(),
    }
}

fn project(item: &Item, projections: &[String]) -> Item {
    if projections.is_empty() {
        return item.clone();
    }
    item.iter()
        .filter(|(name, _)| projections.contains(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn position<'a>(range_field: Option<&str>, entry: &(&'a String, &'a Item)) -> (Option<&'a Value>, &'a str) {
    let (pk, item) = *entry;
    (range_field.and_then(|f| item.get(f)), pk.as_str())
}

fn cursor_cmp(a: (Option<&Value>, &str), b: (Option<&Value>, &str)) -> Ordering {
    let by_range = match (a.0, b.0) {
        (Some(x), Some(y)) => x.sort_cmp(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_range.then_with(|| a.1.cmp(b.1))
}

/// Hash/range keyed tables held in process memory, with local and global
/// secondary indexes evaluated on read.
///
/// # Examples
///
/// ```
/// use memorepo::store::Expectation;
/// use memorepo::{BackingStore, InMemoryStore, Item, PrimaryKey, TableDefinition, Value};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryStore::new();
/// store.create_table(TableDefinition::new("users", "id")).await.unwrap();
///
/// let mut item = Item::new();
/// item.insert("id".to_string(), Value::from("ada"));
/// store.conditional_put("users", item, Expectation::NotExists).await.unwrap();
///
/// let key = PrimaryKey::hash_only("ada");
/// assert!(store.get_item("users", &key, true, &[]).await.unwrap().is_some());
/// # });
/// ```
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_table(&self, definition: TableDefinition) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.contains_key(&definition.name) {
            return Err(RepositoryError::IllegalArgument(format!(
                "Table '{}' already exists",
                definition.name
            )));
        }
        debug!("Creating table '{}' with {} indexes", definition.name, definition.indexes.len());
        tables.insert(
            definition.name.clone(),
            Arc::new(RwLock::new(Table {
                definition,
                items: BTreeMap::new(),
            })),
        );
        Ok(())
    }

    pub async fn item_count(&self, table: &str) -> Result<usize> {
        let handle = self.table(table).await?;
        let table = handle.read().await;
        Ok(table.items.len())
    }

    async fn table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        self.tables
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RepositoryError::backend("ResourceNotFoundException", format!("Table '{}' does not exist", name)))
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn get_item(
        &self,
        table: &str,
        key: &PrimaryKey,
        _consistent_read: bool,
        projections: &[String],
    ) -> Result<Option<Item>> {
        let handle = self.table(table).await?;
        let table = handle.read().await;
        Ok(table.items.get(&encode_key(key)).map(|item| project(item, projections)))
    }

    async fn query(&self, table: &str, request: QueryRequest) -> Result<Page> {
        let handle = self.table(table).await?;
        let table = handle.read().await;
        let def = &table.definition;

        let index = match request.index_name.as_deref() {
            Some(name) => Some(def.index(name).ok_or_else(|| {
                RepositoryError::backend(
                    "ValidationException",
                    format!("Index '{}' does not exist on '{}'", name, def.name),
                )
            })?),
            None => None,
        };
        let range_field = index.map(|i| i.range_field.as_str()).or(def.range_key.as_deref());

        let mut candidates: Vec<(&String, &Item)> = table
            .items
            .iter()
            .filter(|(_, item)| item.get(&request.hash_field).is_some_and(|v| *v == request.hash_value))
            .filter(|(_, item)| index.is_none_or(|i| item.get(&i.range_field).is_some_and(|v| !v.is_null())))
            .collect();

        candidates.sort_by(|a, b| cursor_cmp(position(range_field, a), position(range_field, b)));
        if !request.scan_forward {
            candidates.reverse();
        }

        if let Some(start) = &request.exclusive_start_key {
            let start_pk = encode_key(&table.primary_key_of(start)?);
            let start_range = range_field.and_then(|f| start.get(f));
            let wanted = if request.scan_forward { Ordering::Greater } else { Ordering::Less };
            candidates.retain(|c| cursor_cmp(position(range_field, c), (start_range, start_pk.as_str())) == wanted);
        }

        if let Some(condition) = &request.key_condition {
            candidates.retain(|(_, item)| condition.matches_item(item));
        }
        let scanned_count = candidates.len();

        if let Some(filter) = &request.filter {
            candidates.retain(|(_, item)| filter.matches(item));
        }

        let mut last_evaluated_key = None;
        if let Some(limit) = request.limit {
            if candidates.len() > limit {
                candidates.truncate(limit);
                last_evaluated_key = candidates.last().map(|(_, item)| table.key_attributes(index, item));
            }
        }

        let items: Vec<Item> = candidates
            .into_iter()
            .map(|(_, item)| project(item, &request.projections))
            .collect();

        Ok(Page {
            count: items.len(),
            items,
            last_evaluated_key,
            scanned_count,
        })
    }

    async fn scan(&self, table: &str, request: ScanRequest) -> Result<Page> {
        let handle = self.table(table).await?;
        let table = handle.read().await;

        let start_pk = match &request.exclusive_start_key {
            Some(start) => Some(encode_key(&table.primary_key_of(start)?)),
            None => None,
        };

        let mut candidates: Vec<&Item> = table
            .items
            .iter()
            .enumerate()
            .filter(|(i, _)| request.segment.is_none_or(|(segment, total)| i % total.max(1) == segment))
            .filter(|(_, (pk, _))| start_pk.as_ref().is_none_or(|start| pk.as_str() > start.as_str()))
            .map(|(_, (_, item))| item)
            .collect();
        let scanned_count = candidates.len();

        if let Some(filter) = &request.filter {
            candidates.retain(|item| filter.matches(item));
        }

        let mut last_evaluated_key = None;
        if let Some(limit) = request.limit {
            if candidates.len() > limit {
                candidates.truncate(limit);
                last_evaluated_key = candidates.last().map(|item| table.key_attributes(None, item));
            }
        }

        let items: Vec<Item> = candidates
            .into_iter()
            .map(|item| project(item, &request.projections))
            .collect();

        Ok(Page {
            count: items.len(),
            items,
            last_evaluated_key,
            scanned_count,
        })
    }

    async fn batch_load(&self, table: &str, keys: &[PrimaryKey], projections: &[String]) -> Result<Vec<Item>> {
        let handle = self.table(table).await?;
        let table = handle.read().await;

        let found: BTreeMap<String, Item> = keys
            .iter()
            .map(encode_key)
            .filter_map(|pk| table.items.get(&pk).map(|item| (pk, project(item, projections))))
            .collect();

        Ok(found.into_values().collect())
    }

    async fn conditional_put(&self, table: &str, item: Item, expectation: Expectation) -> Result<()> {
        let handle = self.table(table).await?;
        let mut table = handle.write().await;

        let pk = encode_key(&table.primary_key_of(&item)?);
        table.check(&pk, &expectation)?;
        debug!("Put '{}' into '{}'", pk, table.definition.name);
        table.items.insert(pk, item);
        Ok(())
    }

    async fn conditional_delete(&self, table: &str, key: &PrimaryKey, expectation: Expectation) -> Result<()> {
        let handle = self.table(table).await?;
        let mut table = handle.write().await;

        let pk = encode_key(key);
        table.check(&pk, &expectation)?;
        debug!("Delete '{}' from '{}'", pk, table.definition.name);
        table.items.remove(&pk);
        Ok(())
    }

    async fn describe_indexes(&self, table: &str) -> Result<Vec<IndexDescription>> {
        let handle = self.table(table).await?;
        let table = handle.read().await;
        Ok(table.definition.indexes.clone())
    }
}
