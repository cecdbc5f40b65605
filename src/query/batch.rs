//! Concurrent execution of independent read operations.

use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::time::{Duration, Instant};

/// Run every operation concurrently and collect results in input order.
///
/// Fails fast: the first operation to fail aborts the batch and its error is
/// returned; no partial results are produced.
pub async fn batch_queries<I, Fut, T, E>(operations: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, E>>,
{
    try_join_all(operations).await
}

/// Like [`batch_queries`], but with at most `max_concurrency` operations in flight.
pub async fn batch_queries_limited<I, Fut, T, E>(
    operations: I,
    max_concurrency: usize,
) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, E>>,
{
    stream::iter(operations)
        .buffered(max_concurrency.max(1))
        .try_collect()
        .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    Parallel,
    Sequential,
    Concurrent { max_concurrency: usize },
}
impl Default for BatchStrategy {
    fn default() -> Self {
        BatchStrategy::Parallel
    }
}

/// Every outcome of a batch run with [`BatchExecutor::execute_settled`].
#[derive(Debug, Clone)]
pub struct BatchResult<T, E> {
    pub successes: Vec<(usize, T)>,
    pub failures: Vec<(usize, E)>,
    pub execution_time: Duration,
}

impl<T, E> BatchResult<T, E> {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }
}

pub struct BatchExecutor {
    strategy: BatchStrategy,
}

impl BatchExecutor {
    pub fn new() -> Self {
        Self {
            strategy: BatchStrategy::default(),
        }
    }
    pub fn with_strategy(mut self, s: BatchStrategy) -> Self {
        self.strategy = s;
        self
    }
    pub fn strategy(&self) -> BatchStrategy {
        self.strategy
    }

    fn width(&self, n: usize) -> usize {
        match self.strategy {
            BatchStrategy::Parallel => n.max(1),
            BatchStrategy::Sequential => 1,
            BatchStrategy::Concurrent { max_concurrency } => max_concurrency.max(1),
        }
    }

    /// Fail-fast execution under the configured strategy.
    pub async fn execute<Fut, T, E>(&self, operations: Vec<Fut>) -> Result<Vec<T>, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match self.strategy {
            BatchStrategy::Parallel => batch_queries(operations).await,
            _ => {
                let width = self.width(operations.len());
                batch_queries_limited(operations, width).await
            }
        }
    }

    /// Run everything to completion and report each outcome by input index.
    pub async fn execute_settled<Fut, T, E>(&self, operations: Vec<Fut>) -> BatchResult<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let width = self.width(operations.len());
        let outcomes: Vec<(usize, Result<T, E>)> = stream::iter(operations.into_iter().enumerate())
            .map(|(i, op)| async move { (i, op.await) })
            .buffered(width)
            .collect()
            .await;

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for (i, outcome) in outcomes {
            match outcome {
                Ok(v) => successes.push((i, v)),
                Err(e) => failures.push((i, e)),
            }
        }
        BatchResult {
            successes,
            failures,
            execution_time: start.elapsed(),
        }
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}
