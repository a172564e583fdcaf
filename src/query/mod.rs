//! Parameter compiler
//!
//! Turns the raw query surface (`limit`, `orderBy`, `ids`, `projection`,
//! `aggregate`, `pageToken` and one key per filterable field) into a
//! validated [`QueryPack`], and a pack's filter map into a store key
//! condition plus filter expression.

pub mod aggregate;
pub mod compiler;
pub mod expression;
pub mod filter;
pub mod order_by;
pub mod parameters;
pub mod query_pack;

pub use aggregate::{
    AggregateFunction, AggregateFunctions, DateUnit, GroupingConfiguration, GroupingRange, GroupingUnit,
};
pub use compiler::{
    CompiledQuery, OrderPlan, active_range_field, apply_order_by, build_projections, coerce_value,
    compile_query, compile_scan, has_illegal_ranged_key,
};
pub use expression::{Comparator, Condition, FilterExpression, FilterType, KeyCondition, KeyOperator};
pub use filter::{FilterOperator, FilterParameter};
pub use order_by::{OrderByParameter, SortDirection};
pub use parameters::{QueryMap, build_query_pack, field_of_key};
pub use query_pack::{QueryPack, QueryPackBuilder};
