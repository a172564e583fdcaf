//! Read, write and aggregation engines of one entity type.

pub mod aggregates;
pub mod context;
pub mod deleter;
pub mod grouping;
pub mod keys;
pub mod reader;
pub mod results;
pub mod updater;
pub mod writer;

use std::future::Future;

use futures::future::join_all;
use log::error;

use crate::core::{RepositoryError, Result};

pub use aggregates::Aggregator;
pub use context::{EngineContext, Identifiers};
pub use deleter::Deleter;
pub use reader::Reader;
pub use results::{AggregationResult, ItemList, ItemListMeta, ItemListResult, ItemResult, OperationTimings};
pub use updater::Updater;
pub use writer::Writer;

/// Outcome of a batch whose futures all ran to completion.
pub(crate) struct Settled<T> {
    /// Results of the operations that went through, in submission order.
    pub done: Vec<T>,
    failures: Vec<RepositoryError>,
    total: usize,
}

impl<T> Settled<T> {
    /// Every result, or the first failure exactly as it was raised.
    pub fn first_failure(mut self) -> Result<Vec<T>> {
        if self.failures.is_empty() {
            Ok(self.done)
        } else {
            error!("Batch failed: {} of {} operations", self.failures.len(), self.total);
            Err(self.failures.remove(0))
        }
    }

    /// Every result, or `BatchFailed` counting the failures. A batch of one
    /// reports its failure unwrapped.
    pub fn summarized(mut self) -> Result<Vec<T>> {
        match self.failures.len() {
            0 => Ok(self.done),
            1 if self.total == 1 => Err(self.failures.remove(0)),
            failed => {
                error!("Batch failed: {} of {} operations", failed, self.total);
                Err(RepositoryError::BatchFailed {
                    failed,
                    total: self.total,
                    first: Box::new(self.failures.remove(0)),
                })
            }
        }
    }
}

/// Run every future to completion, keeping successes and failures apart.
/// Writes that succeeded are never rolled back.
pub(crate) async fn settle<T, F>(futures: impl IntoIterator<Item = F>) -> Settled<T>
where
    F: Future<Output = Result<T>>,
{
    let results = join_all(futures).await;
    let total = results.len();

    let mut done = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(value) => done.push(value),
            Err(e) => failures.push(e),
        }
    }
    Settled { done, failures, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_summarized_counts_failures() {
        let futures = (0..4).map(|i| async move {
            if i % 2 == 0 {
                Ok(i)
            } else {
                Err(RepositoryError::Conflict(format!("k{}", i)))
            }
        });
        let settled = settle(futures).await;
        assert_eq!(settled.done, vec![0, 2]);
        match settled.summarized() {
            Err(RepositoryError::BatchFailed { failed, total, first }) => {
                assert_eq!((failed, total), (2, 4));
                assert!(first.is_conflict());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_failure_is_unwrapped() {
        let futures = vec![async { Err::<(), _>(RepositoryError::NotFound("x".into())) }];
        assert!(settle(futures).await.summarized().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_first_failure_surfaces_as_raised() {
        let futures = (0..3).map(|i| async move {
            if i == 1 {
                Err(RepositoryError::Conflict("k1".into()))
            } else {
                Ok(i)
            }
        });
        let settled = settle(futures).await;
        assert_eq!(settled.done.len(), 2);
        assert!(settled.first_failure().unwrap_err().is_conflict());
    }
}
