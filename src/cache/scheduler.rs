use super::async_cache::{AsyncDataCache, CacheInner, Snapshot};
use super::fingerprint::Fingerprint;
use std::marker::PhantomData;
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Refreshed,
    /// Previous fetch still running, or no producer registered yet
    Skipped,
    /// Entry gone or no subscribers left; the poller stops
    Detached,
}

/// Per-entry refresh timer.
pub(crate) struct PollingScheduler;

impl PollingScheduler {
    /// Spawn the poller for one entry. Holds only a weak reference to the cache so a dropped
    /// cache stops its pollers on their next tick.
    pub(crate) fn start(cache: Weak<CacheInner>, fingerprint: Fingerprint, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot poll {} without an async runtime: {}", fingerprint.operation(), e);
                return None;
            }
        };

        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!("Polling {} ({}) every {:?}", fingerprint.operation(), fingerprint.digest(), interval);

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                if cache.on_tick(&fingerprint) == TickOutcome::Detached {
                    break;
                }
            }

            debug!("Stopped polling {} ({})", fingerprint.operation(), fingerprint.digest());
        }))
    }
}

/// An active consumer of one cache entry. Dropping it detaches the consumer; when the last
/// one goes the entry stops refreshing but keeps its value.
pub struct Subscription<T> {
    cache: AsyncDataCache,
    fingerprint: Fingerprint,
    receiver: watch::Receiver<u64>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(cache: AsyncDataCache, fingerprint: Fingerprint, receiver: watch::Receiver<u64>) -> Self {
        Self { cache, fingerprint, receiver, _value: PhantomData }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl<T: Send + Sync + 'static> Subscription<T> {
    pub fn snapshot(&self) -> Snapshot<T> {
        self.cache.peek(&self.fingerprint)
    }

    /// Wait for the next change of the entry (fetch started, landed, or invalidated).
    /// `None` once the entry has been removed from the cache.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.snapshot())
    }

    /// Wait until the entry settles with a value, skipping intermediate loading states.
    pub async fn next_value(&mut self) -> Option<Snapshot<T>> {
        loop {
            let snapshot = self.changed().await?;
            if !snapshot.loading && snapshot.value.is_some() {
                return Some(snapshot);
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cache.detach(&self.fingerprint);
    }
}
