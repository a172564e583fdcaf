use std::cmp::Ordering;
use std::collections::BTreeMap;

use futures::future::try_join_all;
use log::{debug, warn};
use tracing::Instrument;

use super::context::{EngineContext, Identifiers};
use super::keys;
use super::results::{ItemList, ItemListResult, ItemResult, PhaseTimer};
use crate::core::{RepositoryError, Result, Value};
use crate::etag::OBJECT_ETAG_MAP;
use crate::pagination::{PageTokens, create_new_page_token, create_page_token_map};
use crate::query::{
    Comparator, Condition, FilterExpression, FilterOperator, FilterParameter, QueryPack, apply_order_by,
    build_projections, compile_query, compile_scan, has_illegal_ranged_key,
};
use crate::schema::{Entity, KeyShape};
use crate::store::{Item, QueryRequest, ScanRequest};

const HASH_KEY_NAME: &str = "#HASH_KEY_VALUE";
const HASH_KEY_VALUE: &str = ":HASH_VALUE";

/// How a listing reaches the store.
#[derive(Debug, Clone, PartialEq)]
enum ListPlan {
    /// Multi-id batch load.
    Batch,
    /// Key query on a hash, through the table, a local index or a global index.
    Query { shape: KeyShape, hash: Value },
    /// Scan, optionally pinned to one hash, sorted and cursored in memory.
    Scan { shape: KeyShape, hash: Option<Value> },
}

struct ResolvedList {
    plan: ListPlan,
    pack: QueryPack,
    scope: String,
}

/// Raw page before entities are loaded.
struct Fetched {
    items: Vec<Item>,
    /// Item the next page continues after, when there is one.
    last: Option<Item>,
    shape: KeyShape,
    scanned_count: usize,
}

pub struct Reader<E: Entity> {
    ctx: EngineContext<E>,
}

impl<E: Entity> Reader<E> {
    pub fn new(ctx: EngineContext<E>) -> Self {
        Self { ctx }
    }

    /// Single record by hash (and range). Served from the object cache when
    /// possible.
    pub async fn read(&self, identifiers: &Identifiers, consistent: bool, projections: &[String]) -> Result<ItemResult<E>> {
        let span = tracing::debug_span!("read", entity = %self.ctx.type_name());
        self.read_inner(identifiers, consistent, projections).instrument(span).await
    }

    async fn read_inner(&self, identifiers: &Identifiers, consistent: bool, projections: &[String]) -> Result<ItemResult<E>> {
        let mut timer = PhaseTimer::start();
        let schema = &self.ctx.schema;
        let key = self.ctx.primary_key(identifiers)?;
        let object_id = keys::object_cache_id(
            schema.type_name(),
            &key.hash.to_string(),
            key.range.as_ref().map(Value::to_string).as_deref(),
        );
        let cache_id = keys::projection_cache_id(&object_id, projections);
        timer.pre_operation_done();

        if let Some(item) = self.cached_object(&cache_id).await {
            timer.operation_done();
            return Ok(ItemResult {
                item,
                cache_hit: true,
                timings: timer.finish(),
            });
        }

        let shape = schema.table_shape();
        let widened = build_projections(schema, projections, &shape);
        let found = if key.range.is_some() || !schema.has_range_key() {
            self.ctx.store.get_item(&self.ctx.table, &key, consistent, &widened).await?
        } else {
            let request = QueryRequest {
                hash_field: shape.hash_field.clone(),
                hash_value: key.hash.clone(),
                scan_forward: true,
                limit: Some(1),
                projections: widened,
                consistent_read: consistent,
                ..Default::default()
            };
            self.ctx.store.query(&self.ctx.table, request).await?.items.into_iter().next()
        };
        timer.operation_done();

        let Some(found) = found else {
            debug!("No record for id='{}'", object_id);
            return Err(RepositoryError::NotFound(object_id));
        };
        let entity = self.ctx.load(&found)?;

        if let Err(e) = self.cache_and_tag(&cache_id, &entity, projections).await {
            warn!("Post-read caching failed for id='{}': {}", cache_id, e);
        }

        Ok(ItemResult {
            item: entity,
            cache_hit: false,
            timings: timer.finish(),
        })
    }

    /// One result per identifier, in the order given, each read through the
    /// object cache. The first failed read fails the batch.
    pub async fn batch_read(&self, identifiers: &[Identifiers], projections: &[String]) -> Result<Vec<ItemResult<E>>> {
        let consistent = self.ctx.config.consistent_reads;
        let span = tracing::debug_span!("batch_read", entity = %self.ctx.type_name(), count = identifiers.len());
        try_join_all(identifiers.iter().map(|ids| self.read_inner(ids, consistent, projections)))
            .instrument(span)
            .await
    }

    /// Whether `etag` is the current etag of the record.
    pub async fn item_etag_matches(&self, identifiers: &Identifiers, etag: &str) -> Result<bool> {
        let key = self.ctx.primary_key(identifiers)?;
        let object_id = keys::object_cache_id(
            self.ctx.type_name(),
            &key.hash.to_string(),
            key.range.as_ref().map(Value::to_string).as_deref(),
        );
        self.ctx.etags.check_item_etag(OBJECT_ETAG_MAP, &object_id, etag).await
    }

    /// Whether the pack's request etag is the current etag of the listing.
    pub async fn list_etag_matches(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<bool> {
        let Some(etag) = pack.request_etag() else {
            return Ok(false);
        };
        let resolved = self.resolve(identifiers, pack)?;
        let list_key = keys::item_list_etags_key(self.ctx.type_name(), &resolved.scope);
        self.ctx
            .etags
            .check_item_list_etag(&list_key, resolved.pack.base_etag_key(), etag)
            .await
    }

    /// One page of a listing.
    pub async fn read_all(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<ItemListResult<E>> {
        let span = tracing::debug_span!("read_all", entity = %self.ctx.type_name(), key = %pack.base_etag_key());
        self.read_all_inner(identifiers, pack).instrument(span).await
    }

    async fn read_all_inner(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<ItemListResult<E>> {
        let mut timer = PhaseTimer::start();
        let resolved = self.resolve(identifiers, pack)?;
        let type_name = self.ctx.type_name();
        let cache_id = keys::item_list_cache_id(type_name, &resolved.scope, resolved.pack.base_etag_key());
        timer.pre_operation_done();

        if let Some(item_list) = self.cached_list(&cache_id).await {
            timer.operation_done();
            return Ok(ItemListResult {
                item_list,
                cache_hit: true,
                scanned_count: 0,
                timings: timer.finish(),
            });
        }

        let limit = resolved.pack.limit().unwrap_or(self.ctx.config.default_limit);
        let fetched = match &resolved.plan {
            ListPlan::Batch => self.fetch_batch(identifiers, &resolved.pack, limit).await?,
            ListPlan::Query { shape, hash } => self.fetch_query(&resolved.pack, shape, hash, limit).await?,
            ListPlan::Scan { shape, hash } => self.fetch_scan(&resolved.pack, shape, hash.as_ref(), limit).await?,
        };
        timer.operation_done();

        let next = fetched.last.as_ref().map(|last| {
            create_new_page_token(&self.ctx.schema, last, &fetched.shape, resolved.pack.page_token())
        });
        let entities = fetched
            .items
            .iter()
            .map(|item| self.ctx.load(item))
            .collect::<Result<Vec<_>>>()?;
        let item_list = ItemList::new(entities, PageTokens::new(resolved.pack.page_token(), next));
        debug!(
            "Listed {} of {} scanned for scope='{}'",
            item_list.count, fetched.scanned_count, resolved.scope
        );

        if let Err(e) = self.cache_list(&cache_id, &resolved, &item_list).await {
            warn!("Post-read caching failed for list='{}': {}", cache_id, e);
        }

        Ok(ItemListResult {
            item_list,
            cache_hit: false,
            scanned_count: fetched.scanned_count,
            timings: timer.finish(),
        })
    }

    /// Every page of a listing, concatenated.
    pub async fn read_all_without_pagination(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<Vec<E>> {
        let mut page = pack.with_limit(self.ctx.config.max_limit).with_page_token(None);
        let mut items = Vec::new();
        loop {
            let result = self.read_all(identifiers, &page).await?;
            let next = result.next_token().map(str::to_string);
            items.extend(result.item_list.items);
            match next {
                Some(token) => page = page.with_page_token(Some(&token)),
                None => break,
            }
        }
        Ok(items)
    }

    fn resolve(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<ResolvedList> {
        let schema = &self.ctx.schema;

        if !pack.ids().is_empty() {
            return Ok(ResolvedList {
                plan: ListPlan::Batch,
                pack: pack.clone(),
                scope: identifiers.scope(),
            });
        }

        if let Some(index) = identifiers.gsi.as_deref() {
            let hash = identifiers.hash.as_deref().ok_or_else(|| {
                RepositoryError::IllegalArgument(format!("A hash value is required to query index '{}'", index))
            })?;
            let shape = schema.key_shape(Some(index))?;
            let typed = self.ctx.typed_hash(&shape.hash_field, hash)?;
            return Ok(ResolvedList {
                plan: ListPlan::Query { shape, hash: typed },
                pack: pack.clone(),
                scope: keys::list_scope(Some(hash), Some(index)),
            });
        }

        let plan = apply_order_by(schema, pack)?;

        // A global order-by index with an eq filter on its hash is an index query.
        if plan.shape.global {
            if let Some((hash, remaining)) = take_eq_filter(pack.params(), &plan.shape.hash_field) {
                let typed = self.ctx.schema.field_type(&plan.shape.hash_field)?.coerce_json(&hash)?;
                let index = plan.shape.index_name.clone().unwrap_or_default();
                let scope = keys::list_scope(Some(&typed.to_string()), Some(&index));
                return Ok(ResolvedList {
                    plan: ListPlan::Query {
                        shape: plan.shape,
                        hash: typed,
                    },
                    pack: pack.with_params(remaining),
                    scope,
                });
            }
        }

        let scope = identifiers.scope();
        let hash = match identifiers.hash.as_deref() {
            Some(raw) => Some(self.ctx.typed_hash(schema.hash_key(), raw)?),
            None => None,
        };

        let plan = match hash {
            Some(hash)
                if !plan.shape.global
                    && !has_illegal_ranged_key(pack.params(), plan.shape.range_field.as_deref()) =>
            {
                ListPlan::Query { shape: plan.shape, hash }
            }
            hash => ListPlan::Scan { shape: plan.shape, hash },
        };

        Ok(ResolvedList {
            plan,
            pack: pack.clone(),
            scope,
        })
    }

    async fn fetch_batch(&self, identifiers: &Identifiers, pack: &QueryPack, limit: usize) -> Result<Fetched> {
        let schema = &self.ctx.schema;
        let shape = schema.table_shape();

        let keys = pack
            .ids()
            .iter()
            .map(|id| {
                let ids = match (schema.has_range_key(), identifiers.hash.as_deref()) {
                    (true, Some(hash)) => Identifiers::hash(hash).with_range(id.as_str()),
                    (true, None) => {
                        return Err(RepositoryError::IllegalArgument(
                            "Ids of a ranged entity are range values under a hash".to_string(),
                        ));
                    }
                    (false, _) => Identifiers::hash(id.as_str()),
                };
                self.ctx.primary_key(&ids)
            })
            .collect::<Result<Vec<_>>>()?;

        let projections = build_projections(schema, pack.projections(), &shape);
        let loaded = self.ctx.store.batch_load(&self.ctx.table, &keys, &projections).await?;
        let scanned_count = loaded.len();

        // Back into the order the ids were asked for.
        let id_field = schema.range_key().unwrap_or(schema.hash_key());
        let position: BTreeMap<&str, usize> = pack
            .ids()
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut ordered: Vec<(usize, Item)> = loaded
            .into_iter()
            .map(|item| {
                let id = item.get(id_field).map(Value::to_string).unwrap_or_default();
                (position.get(id.as_str()).copied().unwrap_or(usize::MAX), item)
            })
            .collect();
        ordered.sort_by_key(|(i, _)| *i);

        // The cursor is the position of the last returned id in the request,
        // so records that vanished in between do not shift the page.
        if let Some(start) = create_page_token_map(schema, pack.page_token(), &shape)? {
            let seen = start
                .get(id_field)
                .map(Value::to_string)
                .and_then(|id| position.get(id.as_str()).copied())
                .unwrap_or(usize::MAX);
            ordered.retain(|(i, _)| *i > seen);
        }

        let items: Vec<Item> = ordered.into_iter().map(|(_, item)| item).collect();
        Ok(trim(items, limit, shape, scanned_count))
    }

    async fn fetch_query(&self, pack: &QueryPack, shape: &KeyShape, hash: &Value, limit: usize) -> Result<Fetched> {
        let schema = &self.ctx.schema;
        let compiled = compile_query(schema, pack.params(), shape.range_field.as_deref())?;
        let start = create_page_token_map(schema, pack.page_token(), shape)?;

        let request = QueryRequest {
            index_name: shape.index_name.clone(),
            hash_field: shape.hash_field.clone(),
            hash_value: hash.clone(),
            key_condition: compiled.key_condition,
            filter: compiled.filter,
            scan_forward: pack.order_by().is_some_and(|o| o.is_asc()),
            limit: Some(limit),
            exclusive_start_key: start,
            projections: build_projections(schema, pack.projections(), shape),
            consistent_read: self.ctx.config.consistent_reads && !shape.global,
        };
        let page = self.ctx.store.query(&self.ctx.table, request).await?;

        let last = match page.last_evaluated_key {
            Some(_) => page.items.last().cloned(),
            None => None,
        };
        Ok(Fetched {
            items: page.items,
            last,
            shape: shape.clone(),
            scanned_count: page.scanned_count,
        })
    }

    async fn fetch_scan(&self, pack: &QueryPack, shape: &KeyShape, hash: Option<&Value>, limit: usize) -> Result<Fetched> {
        let schema = &self.ctx.schema;
        let mut filter = compile_scan(schema, pack.params())?;

        if let Some(hash) = hash {
            let pinned = FilterExpression {
                condition: Condition::Compare {
                    name: HASH_KEY_NAME.to_string(),
                    comparator: Comparator::Eq,
                    value: HASH_KEY_VALUE.to_string(),
                },
                names: BTreeMap::from([(HASH_KEY_NAME.to_string(), schema.hash_key().to_string())]),
                values: BTreeMap::from([(HASH_KEY_VALUE.to_string(), hash.clone())]),
            };
            filter = Some(match filter {
                Some(rest) => pinned.and(rest),
                None => pinned,
            });
        }

        let request = ScanRequest {
            filter,
            projections: build_projections(schema, pack.projections(), shape),
            consistent_read: self.ctx.config.consistent_reads,
            ..Default::default()
        };
        let mut items = self
            .ctx
            .store
            .parallel_scan(&self.ctx.table, request, self.ctx.config.scan_segments())
            .await?;
        let scanned_count = items.len();

        let sort_field = match pack.order_by().filter(|o| o.is_valid()) {
            Some(order_by) => order_by.field().to_string(),
            None => shape.range_field.clone().unwrap_or_else(|| schema.hash_key().to_string()),
        };
        let ascending = pack.order_by().is_some_and(|o| o.is_asc());
        let order = |a: &Item, b: &Item| {
            let ordering = record_order(&sort_field, schema.hash_key(), schema.range_key(), a, b);
            if ascending { ordering } else { ordering.reverse() }
        };
        items.sort_by(|a, b| order(a, b));

        if let Some(start) = create_page_token_map(schema, pack.page_token(), shape)? {
            items.retain(|item| order(item, &start) == Ordering::Greater);
        }

        Ok(trim(items, limit, shape.clone(), scanned_count))
    }

    async fn cached_object(&self, id: &str) -> Option<E> {
        if !self.ctx.cache.is_object_cache_available() {
            return None;
        }
        match self.ctx.cache.check_object_cache(id).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Object cache lookup failed for id='{}': {}", id, e);
                None
            }
        }
    }

    async fn cached_list(&self, id: &str) -> Option<ItemList<E>> {
        if !self.ctx.cache.is_item_list_cache_available() {
            return None;
        }
        match self.ctx.cache.check_item_list_cache(id).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Item list cache lookup failed for id='{}': {}", id, e);
                None
            }
        }
    }

    async fn cache_and_tag(&self, cache_id: &str, entity: &E, projections: &[String]) -> Result<()> {
        self.ctx.cache.replace_object_cache(cache_id, entity).await?;

        if let Some(etag) = entity.etag() {
            let etags = BTreeMap::from([(entity.etag_key_identifier()?, etag.to_string())]);
            self.ctx.etags.set_single_record_etag(&etags).await?;
            let hash = entity.hash_value()?.to_string();
            self.ctx.etags.set_projection_etags(projections, &hash, etag).await?;
        }
        Ok(())
    }

    async fn cache_list(&self, cache_id: &str, resolved: &ResolvedList, item_list: &ItemList<E>) -> Result<()> {
        self.ctx.cache.replace_item_list_cache(cache_id, item_list).await?;
        let list_key = keys::item_list_etags_key(self.ctx.type_name(), &resolved.scope);
        self.ctx
            .etags
            .set_item_list_etags(&list_key, resolved.pack.base_etag_key(), &item_list.etag)
            .await
    }
}

/// Split off a single `eq` filter on `field`, returning its value and the
/// remaining filters.
fn take_eq_filter(
    params: &BTreeMap<String, Vec<FilterParameter>>,
    field: &str,
) -> Option<(serde_json::Value, BTreeMap<String, Vec<FilterParameter>>)> {
    let value = match params.get(field).map(Vec::as_slice) {
        Some([only]) => match &only.operator {
            FilterOperator::Eq(value) => value.clone(),
            _ => return None,
        },
        _ => return None,
    };
    let mut remaining = params.clone();
    remaining.remove(field);
    Some((value, remaining))
}

/// Sort field first, then table keys so the order is total.
fn record_order(sort_field: &str, hash_key: &str, range_key: Option<&str>, a: &Item, b: &Item) -> Ordering {
    let by = |field: &str| match (a.get(field), b.get(field)) {
        (Some(x), Some(y)) => x.sort_cmp(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by(sort_field)
        .then_with(|| by(hash_key))
        .then_with(|| range_key.map_or(Ordering::Equal, by))
}

fn trim(mut items: Vec<Item>, limit: usize, shape: KeyShape, scanned_count: usize) -> Fetched {
    let last = if items.len() > limit {
        items.truncate(limit);
        items.last().cloned()
    } else {
        None
    };
    Fetched {
        items,
        last,
        shape,
        scanned_count,
    }
}
