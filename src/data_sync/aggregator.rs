use crate::data_sync::markets::MarketDescriptor;
use crate::error::SyncError;
use crate::notify::{Notification, Notifier};
use crate::ports::{Connection, MarketHandle, MarketLoader};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One fan-out element together with the market it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Sourced<T> {
    pub market: MarketDescriptor,
    pub payload: T,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub sources: usize,
    /// Sources that contributed at least one element
    pub succeeded: usize,
    pub failed: usize,
    /// Sources that resolved but had nothing for the actor
    pub empty: usize,
}

enum SourceOutcome<T> {
    Loaded(Vec<T>),
    Failed,
}

/// Runs one query against many markets, isolating per-market failures.
///
/// A market that fails to load or to answer is reported through the notifier and
/// contributes nothing; the others are unaffected. Results are concatenated in the
/// order the markets were given, without de-duplication or truncation.
#[derive(Clone)]
pub struct FanOutAggregator {
    loader: Arc<dyn MarketLoader>,
    notifier: Arc<dyn Notifier>,
    enabled: bool,
    /// Name used in failure reports
    operation: &'static str,
}

impl FanOutAggregator {
    pub fn new(loader: Arc<dyn MarketLoader>, notifier: Arc<dyn Notifier>) -> Self {
        Self { loader, notifier, enabled: true, operation: "fan-out" }
    }

    /// A disabled aggregator answers every call with an empty result.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn named(mut self, operation: &'static str) -> Self {
        self.operation = operation;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub async fn aggregate<T, F, Fut>(
        &self,
        connection: Arc<dyn Connection>,
        markets: &[MarketDescriptor],
        fetch: F,
    ) -> Vec<Sourced<T>>
    where
        F: Fn(Arc<dyn MarketHandle>, MarketDescriptor) -> Fut,
        Fut: Future<Output = eyre::Result<Vec<T>>>,
    {
        self.aggregate_with_stats(connection, markets, fetch).await.0
    }

    pub async fn aggregate_with_stats<T, F, Fut>(
        &self,
        connection: Arc<dyn Connection>,
        markets: &[MarketDescriptor],
        fetch: F,
    ) -> (Vec<Sourced<T>>, AggregatorStats)
    where
        F: Fn(Arc<dyn MarketHandle>, MarketDescriptor) -> Fut,
        Fut: Future<Output = eyre::Result<Vec<T>>>,
    {
        let mut stats = AggregatorStats { sources: markets.len(), ..AggregatorStats::default() };
        if !self.enabled {
            debug!("Fan-out disabled, skipping {} markets", markets.len());
            return (Vec::new(), stats);
        }

        let start_time = Instant::now();
        let fetch = &fetch;
        let outcomes = join_all(markets.iter().map(|market| {
            let connection = Arc::clone(&connection);
            async move { self.query_source(connection, market, fetch).await }
        }))
        .await;

        let mut results = Vec::new();
        for (market, outcome) in markets.iter().zip(outcomes) {
            match outcome {
                SourceOutcome::Failed => stats.failed += 1,
                SourceOutcome::Loaded(items) if items.is_empty() => stats.empty += 1,
                SourceOutcome::Loaded(items) => {
                    stats.succeeded += 1;
                    results.extend(items.into_iter().map(|payload| Sourced { market: market.clone(), payload }));
                }
            }
        }

        info!(
            "Fan-out over {} markets completed in {:?} - {} with data, {} empty, {} failed, {} elements",
            stats.sources,
            start_time.elapsed(),
            stats.succeeded,
            stats.empty,
            stats.failed,
            results.len()
        );
        (results, stats)
    }

    async fn query_source<T, F, Fut>(
        &self,
        connection: Arc<dyn Connection>,
        market: &MarketDescriptor,
        fetch: &F,
    ) -> SourceOutcome<T>
    where
        F: Fn(Arc<dyn MarketHandle>, MarketDescriptor) -> Fut,
        Fut: Future<Output = eyre::Result<Vec<T>>>,
    {
        let handle = match self.loader.load(connection, market).await {
            Ok(handle) => handle,
            Err(e) => {
                let error = SyncError::SourceResolution { market: market.address.to_string(), reason: format!("{e:#}") };
                warn!("{} ({})", error, market.name);
                self.notifier.notify(Notification::error(format!("Error loading market {}", market.name), error.to_string()));
                return SourceOutcome::Failed;
            }
        };

        match fetch(handle, market.clone()).await {
            Ok(items) => SourceOutcome::Loaded(items),
            Err(e) => {
                let error = SyncError::Fetch {
                    operation: self.operation.to_string(),
                    market: market.address.to_string(),
                    reason: format!("{e:#}"),
                };
                warn!("{} ({})", error, market.name);
                self.notifier.notify(Notification::warning(format!("Error fetching data for {}", market.name), error.to_string()));
                SourceOutcome::Failed
            }
        }
    }
}
