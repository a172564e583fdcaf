use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value as JsonValue, json};

use crate::core::Result;
use crate::etag::fold_etags;
use crate::pagination::PageTokens;
use crate::schema::Entity;

/// Advisory timings of one engine call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationTimings {
    pub pre_operation: Duration,
    pub operation: Duration,
    pub post_operation: Duration,
}

/// Stopwatch splitting a call into pre-operation, operation and
/// post-operation phases.
pub(crate) struct PhaseTimer {
    started: Instant,
    timings: OperationTimings,
}

impl PhaseTimer {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            timings: OperationTimings::default(),
        }
    }

    fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.started;
        self.started = now;
        elapsed
    }

    pub(crate) fn pre_operation_done(&mut self) {
        self.timings.pre_operation = self.lap();
    }

    pub(crate) fn operation_done(&mut self) {
        self.timings.operation = self.lap();
    }

    pub(crate) fn finish(mut self) -> OperationTimings {
        self.timings.post_operation = self.lap();
        self.timings
    }
}

#[derive(Debug, Clone)]
pub struct ItemResult<E> {
    pub item: E,
    pub cache_hit: bool,
    pub timings: OperationTimings,
}

/// One page of entities with its tokens and folded etag.
#[derive(Debug, Clone)]
pub struct ItemList<E> {
    pub etag: String,
    pub page_tokens: PageTokens,
    pub count: usize,
    pub items: Vec<E>,
}

impl<E: Entity> ItemList<E> {
    pub fn new(items: Vec<E>, page_tokens: PageTokens) -> Self {
        let etag = fold_etags(items.iter().filter_map(|item| item.etag()));
        Self {
            etag,
            page_tokens,
            count: items.len(),
            items,
        }
    }

    pub fn to_json(&self, projections: &[String]) -> Result<JsonValue> {
        let items = self
            .items
            .iter()
            .map(|item| item.to_document(projections))
            .collect::<Result<Vec<_>>>()?;

        Ok(json!({
            "etag": self.etag,
            "pageTokens": self.page_tokens,
            "count": self.count,
            "items": items,
        }))
    }

    pub fn meta(&self, total_count: usize) -> ItemListMeta {
        ItemListMeta {
            etag: self.etag.clone(),
            count: self.count,
            total_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemListMeta {
    pub etag: String,
    pub count: usize,
    pub total_count: usize,
}

#[derive(Debug, Clone)]
pub struct ItemListResult<E> {
    pub item_list: ItemList<E>,
    pub cache_hit: bool,
    pub scanned_count: usize,
    pub timings: OperationTimings,
}

impl<E> ItemListResult<E> {
    pub fn items(&self) -> &[E] {
        &self.item_list.items
    }

    pub fn next_token(&self) -> Option<&str> {
        self.item_list
            .page_tokens
            .has_next()
            .then_some(self.item_list.page_tokens.next.as_str())
    }
}

/// Aggregation payload with its content etag.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationResult {
    pub etag: String,
    pub content: JsonValue,
    pub cache_hit: bool,
    pub timings: OperationTimings,
}
