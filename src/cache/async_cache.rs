use super::entry::{CacheEntry, FetchTicket, Producer, RawSnapshot, Value};
use super::fingerprint::Fingerprint;
use super::scheduler::{PollingScheduler, Subscription, TickOutcome};
use super::tier::FetchOptions;
use crate::notify::{Notification, Notifier};
use dashmap::DashMap;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Read-only view of a cache entry handed to consumers.
#[derive(Debug)]
pub struct Snapshot<T> {
    /// Last successful result, `None` before the first success or after a clearing invalidation
    pub value: Option<Arc<T>>,
    pub loading: bool,
    pub fetched_at: Option<Instant>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self { value: self.value.clone(), loading: self.loading, fetched_at: self.fetched_at }
    }
}

impl<T> Snapshot<T> {
    /// A settled snapshot that never touched the cache (short-circuited calls).
    pub fn ready(value: T) -> Self {
        Self { value: Some(Arc::new(value)), loading: false, fetched_at: None }
    }

    /// Nothing cached and nothing running.
    pub fn idle() -> Self {
        Self { value: None, loading: false, fetched_at: None }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        !self.loading
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub fetches: AtomicU64,
    pub failures: AtomicU64,
    pub discarded: AtomicU64,
    pub skipped_ticks: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) struct CacheInner {
    entries: DashMap<Fingerprint, CacheEntry, ahash::RandomState>,
    notifier: Arc<dyn Notifier>,
    stats: CacheStats,
}

/// Fingerprint-keyed table of async query results.
///
/// Coalesces concurrent requests into one fetch per fingerprint, serves the last good
/// value while refreshing, and keeps subscribed entries fresh on their refresh interval.
/// Cloning is cheap and shares the table. Fetches are spawned on the ambient tokio runtime.
#[derive(Clone)]
pub struct AsyncDataCache {
    inner: Arc<CacheInner>,
}

impl AsyncDataCache {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::with_hasher(ahash::RandomState::new()),
                notifier,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Current value and loading flag for `fingerprint`, starting a fetch when needed.
    ///
    /// Never waits for the producer: the first call returns `(None, loading)`. While a fetch
    /// is in flight no second one is started. The stored producer is replaced by this one,
    /// so scheduled refreshes use the caller's latest inputs.
    pub fn get<T, F, Fut>(&self, fingerprint: &Fingerprint, producer: F, options: FetchOptions) -> Snapshot<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        let raw = self.inner.get_erased(fingerprint, erase(producer), options);
        downcast(fingerprint, raw)
    }

    /// `get`, then wait until the entry is no longer loading.
    pub async fn resolve<T, F, Fut>(&self, fingerprint: &Fingerprint, producer: F, options: FetchOptions) -> Snapshot<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        let snapshot = self.get(fingerprint, producer, options);
        if !snapshot.loading {
            return snapshot;
        }
        let Some(mut receiver) = self.inner.receiver(fingerprint) else {
            return self.peek(fingerprint);
        };
        loop {
            let snapshot = self.peek::<T>(fingerprint);
            if !snapshot.loading {
                return snapshot;
            }
            if receiver.changed().await.is_err() {
                // entry removed while waiting
                return self.peek(fingerprint);
            }
        }
    }

    /// Read an entry without producing. Missing entries read as idle.
    pub fn peek<T: Send + Sync + 'static>(&self, fingerprint: &Fingerprint) -> Snapshot<T> {
        match self.inner.entries.get(fingerprint) {
            Some(entry) => downcast(fingerprint, entry.raw_snapshot()),
            None => Snapshot::idle(),
        }
    }

    /// Register an active consumer. While at least one subscription is alive and the
    /// entry has a refresh interval, the producer is re-run on that cadence.
    pub fn subscribe<T, F, Fut>(&self, fingerprint: &Fingerprint, producer: F, options: FetchOptions) -> Subscription<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        self.get::<T, F, Fut>(fingerprint, producer, options);
        let receiver = self.inner.attach(fingerprint, options.refresh_interval);
        Subscription::new(self.clone(), fingerprint.clone(), receiver)
    }

    /// `clear_value = true` drops the stored value and any in-flight result so the next
    /// `get` refetches at once. `false` only marks the entry stale; the old value is served
    /// until the refresh lands. Returns whether the entry existed.
    pub fn invalidate(&self, fingerprint: &Fingerprint, clear_value: bool) -> bool {
        let Some(mut entry) = self.inner.entries.get_mut(fingerprint) else {
            return false;
        };
        debug!("Invalidating {} ({}) clear_value={}", fingerprint.operation(), fingerprint.digest(), clear_value);
        if clear_value {
            entry.clear();
        } else {
            entry.mark_stale();
        }
        true
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.entries.remove(fingerprint).is_some()
    }

    /// Drop every entry and stop all pollers.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.entries.contains_key(fingerprint)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }

    pub fn subscriber_count(&self, fingerprint: &Fingerprint) -> usize {
        self.inner.entries.get(fingerprint).map(|e| e.subscribers).unwrap_or(0)
    }

    pub(crate) fn detach(&self, fingerprint: &Fingerprint) {
        self.inner.detach(fingerprint);
    }
}

impl CacheInner {
    fn get_erased(self: &Arc<Self>, fingerprint: &Fingerprint, producer: Producer, options: FetchOptions) -> RawSnapshot {
        let now = Instant::now();
        let (snapshot, ticket) = {
            let mut created = false;
            let mut entry = self.entries.entry(fingerprint.clone()).or_insert_with(|| {
                created = true;
                CacheEntry::new(options.refresh_interval)
            });
            CacheStats::bump(if created { &self.stats.misses } else { &self.stats.hits });

            entry.producer = Some(Arc::clone(&producer));
            if entry.refresh_interval != options.refresh_interval {
                self.retune(fingerprint, &mut entry, options.refresh_interval);
            }

            let ticket = entry.should_fetch_on_get(now).then(|| entry.begin_fetch());
            (entry.raw_snapshot(), ticket)
        };

        if let Some(ticket) = ticket {
            self.spawn_fetch(fingerprint.clone(), ticket, producer);
        }
        snapshot
    }

    /// Apply a new refresh interval, restarting the poller if one is running.
    fn retune(self: &Arc<Self>, fingerprint: &Fingerprint, entry: &mut CacheEntry, interval: Duration) {
        debug!("{} refresh interval {:?} -> {:?}", fingerprint.operation(), entry.refresh_interval, interval);
        entry.refresh_interval = interval;
        if let Some(poller) = entry.poller.take() {
            poller.abort();
        }
        if entry.subscribers > 0 && !interval.is_zero() {
            entry.poller = PollingScheduler::start(Arc::downgrade(self), fingerprint.clone(), interval);
        }
    }

    fn spawn_fetch(self: &Arc<Self>, fingerprint: Fingerprint, ticket: FetchTicket, producer: Producer) {
        CacheStats::bump(&self.stats.fetches);
        debug!("Fetching {} ({}) ticket {}", fingerprint.operation(), fingerprint.digest(), ticket.id);

        let future = producer();
        match Handle::try_current() {
            Ok(handle) => {
                let cache = Arc::downgrade(self);
                handle.spawn(async move {
                    let result = future.await;
                    if let Some(cache) = cache.upgrade() {
                        cache.complete(&fingerprint, ticket, result);
                    }
                });
            }
            Err(e) => {
                self.complete(&fingerprint, ticket, Err(eyre::eyre!("no async runtime to run the fetch: {}", e)));
            }
        }
    }

    fn complete(&self, fingerprint: &Fingerprint, ticket: FetchTicket, result: eyre::Result<Value>) {
        let failure = {
            let Some(mut entry) = self.entries.get_mut(fingerprint) else {
                CacheStats::bump(&self.stats.discarded);
                debug!("Discarding {} result: entry removed", fingerprint.operation());
                return;
            };
            if !entry.accepts(ticket) {
                CacheStats::bump(&self.stats.discarded);
                debug!("Discarding superseded {} result (ticket {})", fingerprint.operation(), ticket.id);
                return;
            }

            let now = Instant::now();
            entry.in_flight = None;
            entry.loading = false;
            entry.attempted_at = Some(now);
            let failure = match result {
                Ok(value) => {
                    entry.value = Some(value);
                    entry.fetched_at = Some(now);
                    None
                }
                Err(e) => {
                    CacheStats::bump(&self.stats.failures);
                    Some(e)
                }
            };
            entry.publish();
            failure
        };

        // notify outside the entry lock
        if let Some(e) = failure {
            warn!("Fetch {} ({}) failed: {:#}", fingerprint.operation(), fingerprint.digest(), e);
            self.notifier.notify(Notification::error(format!("Error refreshing {}", fingerprint.operation()), format!("{e:#}")));
        }
    }

    pub(crate) fn on_tick(self: &Arc<Self>, fingerprint: &Fingerprint) -> TickOutcome {
        let (ticket, producer) = {
            let Some(mut entry) = self.entries.get_mut(fingerprint) else {
                return TickOutcome::Detached;
            };
            if entry.subscribers == 0 {
                entry.poller = None;
                return TickOutcome::Detached;
            }
            if entry.in_flight.is_some() {
                CacheStats::bump(&self.stats.skipped_ticks);
                trace!("Skipping {} tick: fetch still in flight", fingerprint.operation());
                return TickOutcome::Skipped;
            }
            let Some(producer) = entry.producer.clone() else {
                return TickOutcome::Skipped;
            };
            (entry.begin_fetch(), producer)
        };
        self.spawn_fetch(fingerprint.clone(), ticket, producer);
        TickOutcome::Refreshed
    }

    fn receiver(&self, fingerprint: &Fingerprint) -> Option<watch::Receiver<u64>> {
        self.entries.get(fingerprint).map(|entry| entry.watch())
    }

    fn attach(self: &Arc<Self>, fingerprint: &Fingerprint, interval: Duration) -> watch::Receiver<u64> {
        let mut entry = self.entries.entry(fingerprint.clone()).or_insert_with(|| CacheEntry::new(interval));
        entry.subscribers += 1;
        if entry.poller.is_none() && !entry.refresh_interval.is_zero() {
            entry.poller = PollingScheduler::start(Arc::downgrade(self), fingerprint.clone(), entry.refresh_interval);
        }
        entry.watch()
    }

    fn detach(&self, fingerprint: &Fingerprint) {
        let Some(mut entry) = self.entries.get_mut(fingerprint) else {
            return;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers == 0 {
            if let Some(poller) = entry.poller.take() {
                debug!("Last subscriber of {} detached, stopping poller", fingerprint.operation());
                poller.abort();
            }
        }
    }
}

fn erase<T, F, Fut>(producer: F) -> Producer
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<T>> + Send + 'static,
{
    Arc::new(move || {
        let future = producer();
        async move { future.await.map(|value| Arc::new(value) as Value) }.boxed()
    })
}

fn downcast<T: Send + Sync + 'static>(fingerprint: &Fingerprint, raw: RawSnapshot) -> Snapshot<T> {
    let value = raw.value.and_then(|value| match value.downcast::<T>() {
        Ok(typed) => Some(typed),
        Err(_) => {
            warn!("Fingerprint collision: {} holds a value of another type", fingerprint);
            None
        }
    });
    Snapshot { value, loading: raw.loading, fetched_at: raw.fetched_at }
}
