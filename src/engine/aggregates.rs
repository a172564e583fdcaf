use std::cmp::Ordering;

use log::{debug, warn};
use serde_json::{Value as JsonValue, json};
use tracing::Instrument;
use xxhash_rust::xxh3::xxh3_64;

use super::context::{EngineContext, Identifiers};
use super::grouping;
use super::keys;
use super::reader::Reader;
use super::results::{AggregationResult, PhaseTimer};
use crate::core::{RepositoryError, Result};
use crate::etag::new_etag;
use crate::query::{AggregateFunction, AggregateFunctions, QueryPack};
use crate::schema::Entity;

const EMPTY_TABLE: &str = "Empty table!";

pub struct Aggregator<E: Entity> {
    ctx: EngineContext<E>,
    reader: Reader<E>,
}

impl<E: Entity> Aggregator<E> {
    pub fn new(ctx: EngineContext<E>) -> Self {
        Self {
            reader: Reader::new(ctx.clone()),
            ctx,
        }
    }

    /// Run the pack's aggregate function over every record the pack's
    /// filters select.
    pub async fn aggregation(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<AggregationResult> {
        let function = pack
            .aggregate()
            .ok_or_else(|| RepositoryError::validation("aggregate_error", "No aggregate function supplied"))?;
        function.validate(&self.ctx.schema).into_result()?;

        let span = tracing::debug_span!("aggregation", function = %function.function, key = %pack.base_etag_key());
        self.aggregate_inner(identifiers, pack, function).instrument(span).await
    }

    /// Whether the pack's request etag is the current etag of its aggregation.
    pub async fn aggregation_etag_matches(&self, identifiers: &Identifiers, pack: &QueryPack) -> Result<bool> {
        let (Some(etag), Some(function)) = (pack.request_etag(), pack.aggregate()) else {
            return Ok(false);
        };
        let list_key = keys::item_list_etags_key(self.ctx.type_name(), &identifiers.scope());
        let etag_key = keys::aggregation_key(&identifiers.scope(), pack.base_etag_key(), function);
        self.ctx.etags.check_aggregation_etag(&list_key, &etag_key, etag).await
    }

    async fn aggregate_inner(
        &self,
        identifiers: &Identifiers,
        pack: &QueryPack,
        function: &AggregateFunction,
    ) -> Result<AggregationResult> {
        let mut timer = PhaseTimer::start();
        let key = keys::aggregation_key(&identifiers.scope(), pack.base_etag_key(), function);
        timer.pre_operation_done();

        if let Some(content) = self.cached(&key).await {
            timer.operation_done();
            let etag = content_etag(&content);
            let content = serde_json::from_str(&content)?;
            return Ok(AggregationResult {
                etag,
                content,
                cache_hit: true,
                timings: timer.finish(),
            });
        }

        let projections = narrowed_projections(function);
        let records = self
            .reader
            .read_all_without_pagination(identifiers, &pack.with_projections(projections.clone()))
            .await?;
        debug!("Aggregating {} over {} records", function.function, records.len());
        let content = self.compute(function, &records, &projections)?;
        timer.operation_done();

        let rendered = content.to_string();
        let etag = content_etag(&rendered);
        if let Err(e) = self.store(identifiers, &key, &rendered, &etag).await {
            warn!("Post-aggregation caching failed for key='{}': {}", key, e);
        }

        Ok(AggregationResult {
            etag,
            content,
            cache_hit: false,
            timings: timer.finish(),
        })
    }

    fn compute(&self, function: &AggregateFunction, records: &[E], projections: &[String]) -> Result<JsonValue> {
        if records.is_empty() {
            return Ok(match function.function {
                AggregateFunctions::Count => json!({ "count": 0 }),
                _ => json!({ "error": EMPTY_TABLE }),
            });
        }

        let field = function.field();
        let leaf = |items: &[&E]| -> Result<JsonValue> {
            match function.function {
                AggregateFunctions::Count => Ok(JsonValue::from(items.len())),
                AggregateFunctions::Sum => Ok(JsonValue::from(self.sum(items, field)?)),
                AggregateFunctions::Avg => Ok(JsonValue::from(self.sum(items, field)? / items.len() as f64)),
                AggregateFunctions::Min => self.extremes(items, field, Ordering::Less, projections),
                AggregateFunctions::Max => self.extremes(items, field, Ordering::Greater, projections),
            }
        };

        let all: Vec<&E> = records.iter().collect();
        if function.has_grouping() {
            return grouping::group(
                &self.ctx.schema,
                &all,
                &function.group_by,
                function.function.result_key(),
                &leaf,
            );
        }

        let value = leaf(all.as_slice())?;
        Ok(match function.function {
            AggregateFunctions::Min | AggregateFunctions::Max => value,
            other => {
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(other.result_key().to_string(), value);
                JsonValue::Object(wrapped)
            }
        })
    }

    fn sum(&self, items: &[&E], field: &str) -> Result<f64> {
        let mut total = 0.0;
        for item in items {
            total += self.ctx.schema.get(item, field)?.as_f64().unwrap_or(0.0);
        }
        Ok(total)
    }

    /// Every item tied at the extreme `wanted` selects.
    fn extremes(&self, items: &[&E], field: &str, wanted: Ordering, projections: &[String]) -> Result<JsonValue> {
        let mut best: Option<f64> = None;
        let mut tied: Vec<&E> = Vec::new();

        for &item in items {
            let Some(value) = self.ctx.schema.get(item, field)?.as_f64() else {
                continue;
            };
            match best.map(|b| value.total_cmp(&b)) {
                None => {
                    best = Some(value);
                    tied = vec![item];
                }
                Some(ordering) if ordering == wanted => {
                    best = Some(value);
                    tied = vec![item];
                }
                Some(Ordering::Equal) => tied.push(item),
                Some(_) => {}
            }
        }

        let documents = tied
            .into_iter()
            .map(|item| item.to_document(projections))
            .collect::<Result<Vec<_>>>()?;
        Ok(JsonValue::Array(documents))
    }

    async fn cached(&self, key: &str) -> Option<String> {
        if !self.ctx.cache.is_aggregation_cache_available() {
            return None;
        }
        match self.ctx.cache.check_aggregation_cache(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Aggregation cache lookup failed for key='{}': {}", key, e);
                None
            }
        }
    }

    async fn store(&self, identifiers: &Identifiers, key: &str, content: &str, etag: &str) -> Result<()> {
        self.ctx.cache.replace_aggregation_cache(key, content).await?;
        let list_key = keys::item_list_etags_key(self.ctx.type_name(), &identifiers.scope());
        self.ctx.etags.replace_aggregation_etag(&list_key, key, etag).await
    }
}

/// The aggregated field and the grouping fields; keys are added when the
/// projection is widened for the store.
fn narrowed_projections(function: &AggregateFunction) -> Vec<String> {
    let mut projections: Vec<String> = Vec::new();
    if let Some(field) = function.field.as_deref().filter(|f| !f.is_empty()) {
        projections.push(field.to_string());
    }
    for level in &function.group_by {
        if !projections.contains(&level.group_by) {
            projections.push(level.group_by.clone());
        }
    }
    projections
}

fn content_etag(content: &str) -> String {
    new_etag(xxh3_64(content.as_bytes()))
}
