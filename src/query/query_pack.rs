use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;
use xxhash_rust::xxh3::xxh3_64;

use super::aggregate::AggregateFunction;
use super::filter::FilterParameter;
use super::order_by::OrderByParameter;
use crate::core::{RepositoryError, Result};

/// Immutable, fully validated request. Two packs describing the same
/// request share a `base_etag_key` no matter how they were assembled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPack {
    route: String,
    page_token: Option<String>,
    request_etag: Option<String>,
    order_by: Option<OrderByParameter>,
    params: BTreeMap<String, Vec<FilterParameter>>,
    aggregate: Option<AggregateFunction>,
    projections: Vec<String>,
    index_name: Option<String>,
    limit: Option<usize>,
    ids: Vec<String>,
    base_etag_key: String,
}

impl QueryPack {
    pub fn builder(route: &str) -> QueryPackBuilder {
        QueryPackBuilder {
            route: route.to_string(),
            ..Default::default()
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }

    pub fn request_etag(&self) -> Option<&str> {
        self.request_etag.as_deref()
    }

    pub fn order_by(&self) -> Option<&OrderByParameter> {
        self.order_by.as_ref()
    }

    pub fn params(&self) -> &BTreeMap<String, Vec<FilterParameter>> {
        &self.params
    }

    pub fn aggregate(&self) -> Option<&AggregateFunction> {
        self.aggregate.as_ref()
    }

    pub fn projections(&self) -> &[String] {
        &self.projections
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn base_etag_key(&self) -> &str {
        &self.base_etag_key
    }

    pub fn has_filters(&self) -> bool {
        !self.params.is_empty()
    }

    /// Same request positioned at another page.
    pub fn with_page_token(&self, token: Option<&str>) -> QueryPack {
        self.to_builder().with_page_token(token).assemble()
    }

    /// Same request with a different filter map; used when a filter is
    /// consumed as an index key.
    pub fn with_params(&self, params: BTreeMap<String, Vec<FilterParameter>>) -> QueryPack {
        let mut builder = self.to_builder();
        builder.params = params;
        builder.assemble()
    }

    /// Same request with another page size.
    pub fn with_limit(&self, limit: usize) -> QueryPack {
        self.to_builder().with_limit(limit).assemble()
    }

    /// Same request with another projection list.
    pub fn with_projections(&self, projections: Vec<String>) -> QueryPack {
        self.to_builder().with_projections(projections).assemble()
    }

    fn to_builder(&self) -> QueryPackBuilder {
        QueryPackBuilder {
            route: self.route.clone(),
            page_token: self.page_token.clone(),
            request_etag: self.request_etag.clone(),
            order_by: self.order_by.clone(),
            params: self.params.clone(),
            aggregate: self.aggregate.clone(),
            projections: self.projections.clone(),
            index_name: self.index_name.clone(),
            limit: self.limit,
            ids: self.ids.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct QueryPackBuilder {
    route: String,
    page_token: Option<String>,
    request_etag: Option<String>,
    order_by: Option<OrderByParameter>,
    params: BTreeMap<String, Vec<FilterParameter>>,
    aggregate: Option<AggregateFunction>,
    projections: Vec<String>,
    index_name: Option<String>,
    limit: Option<usize>,
    ids: Vec<String>,
}

impl QueryPackBuilder {
    pub fn with_page_token(mut self, token: Option<&str>) -> Self {
        self.page_token = token.filter(|t| !t.is_empty()).map(str::to_string);
        self
    }

    pub fn with_request_etag(mut self, etag: Option<&str>) -> Self {
        self.request_etag = etag.map(str::to_string);
        self
    }

    pub fn with_order_by(mut self, order_by: OrderByParameter) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn add_param(mut self, param: FilterParameter) -> Self {
        self.params.entry(param.field.clone()).or_default().push(param);
        self
    }

    pub fn with_params(mut self, params: Vec<FilterParameter>) -> Self {
        for param in params {
            self = self.add_param(param);
        }
        self
    }

    pub fn with_aggregate(mut self, aggregate: AggregateFunction) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    pub fn with_projections(mut self, projections: Vec<String>) -> Self {
        self.projections = projections;
        self
    }

    pub fn with_index_name(mut self, index: &str) -> Self {
        self.index_name = Some(index.to_string());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = ids;
        self
    }

    pub fn build(self) -> Result<QueryPack> {
        if self.route.is_empty() {
            return Err(RepositoryError::IllegalArgument("A route is required".to_string()));
        }
        if self.limit == Some(0) {
            return Err(RepositoryError::IllegalArgument(
                "Limit must be a whole positive Integer!".to_string(),
            ));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> QueryPack {
        // serde_json maps are ordered, so the rendering is canonical.
        let canonical = json!({
            "route": self.route,
            "pageToken": self.page_token,
            "orderBy": self.order_by,
            "params": self.params,
            "aggregate": self.aggregate,
            "projections": self.projections,
            "indexName": self.index_name,
            "limit": self.limit,
            "ids": self.ids,
        });
        let base_etag_key = format!("{:016x}", xxh3_64(canonical.to_string().as_bytes()));

        QueryPack {
            route: self.route,
            page_token: self.page_token,
            request_etag: self.request_etag,
            order_by: self.order_by,
            params: self.params,
            aggregate: self.aggregate,
            projections: self.projections,
            index_name: self.index_name,
            limit: self.limit,
            ids: self.ids,
            base_etag_key,
        }
    }
}
