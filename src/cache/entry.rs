use futures::future::BoxFuture;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Type-erased producer. Re-invoked by the scheduler, so it must be callable many times.
pub(crate) type Producer = Arc<dyn Fn() -> BoxFuture<'static, eyre::Result<Value>> + Send + Sync>;

/// Identifies one started fetch. A completion is applied only if its ticket is still the
/// entry's in-flight ticket and the generation has not moved since it started.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FetchTicket {
    pub id: u64,
    pub generation: u64,
}

pub(crate) struct CacheEntry {
    pub value: Option<Value>,
    pub loading: bool,
    /// Soft invalidation: keep serving `value`, refetch at the next opportunity
    pub stale: bool,
    /// Set on creation and by clearing invalidation: the next `get` fetches immediately
    pub needs_fetch: bool,
    pub fetched_at: Option<Instant>,
    pub attempted_at: Option<Instant>,
    pub refresh_interval: Duration,
    /// Bumped by clearing invalidation
    pub generation: u64,
    pub in_flight: Option<FetchTicket>,
    next_ticket: u64,
    pub producer: Option<Producer>,
    pub subscribers: usize,
    pub poller: Option<JoinHandle<()>>,
    version: watch::Sender<u64>,
}

/// Untyped view of an entry, downcast by the cache front.
pub(crate) struct RawSnapshot {
    pub value: Option<Value>,
    pub loading: bool,
    pub fetched_at: Option<Instant>,
}

impl CacheEntry {
    pub fn new(refresh_interval: Duration) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            value: None,
            loading: false,
            stale: false,
            needs_fetch: true,
            fetched_at: None,
            attempted_at: None,
            refresh_interval,
            generation: 0,
            in_flight: None,
            next_ticket: 0,
            producer: None,
            subscribers: 0,
            poller: None,
            version,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        if self.refresh_interval.is_zero() {
            return false;
        }
        match self.attempted_at {
            Some(at) => now.saturating_duration_since(at) >= self.refresh_interval,
            None => false,
        }
    }

    /// Whether a plain `get` should start a fetch. Never true while one is in flight.
    pub fn should_fetch_on_get(&self, now: Instant) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        // with a running poller, soft invalidation waits for the next tick
        self.needs_fetch || (self.stale && self.poller.is_none()) || self.is_expired(now)
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.next_ticket += 1;
        let ticket = FetchTicket { id: self.next_ticket, generation: self.generation };
        self.in_flight = Some(ticket);
        self.loading = true;
        self.needs_fetch = false;
        self.stale = false;
        self.publish();
        ticket
    }

    pub fn accepts(&self, ticket: FetchTicket) -> bool {
        self.generation == ticket.generation && self.in_flight == Some(ticket)
    }

    /// Drop the value and orphan any in-flight fetch.
    pub fn clear(&mut self) {
        self.value = None;
        self.fetched_at = None;
        self.generation += 1;
        self.in_flight = None;
        self.loading = false;
        self.stale = false;
        self.needs_fetch = true;
        self.publish();
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
        self.publish();
    }

    pub fn publish(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn raw_snapshot(&self) -> RawSnapshot {
        RawSnapshot { value: self.value.clone(), loading: self.loading, fetched_at: self.fetched_at }
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}
