//! Process-wide client statistics
//!
//! Every `HttpClient` reports into a `Stats` sink, by default the global one.
//! Counters only ever grow and are read through point-in-time snapshots.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<Arc<Stats>> = OnceLock::new();

/// Monotonic counters shared by all clients reporting to this sink.
#[derive(Debug, Default)]
pub struct Stats {
    objects: AtomicU64,
    sessions: AtomicU64,
    requests: AtomicU64,
    retries: AtomicU64,
    forced_closes: AtomicU64,
}

/// Copy of the counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Clients constructed
    pub objects: u64,
    /// Sessions opened
    pub sessions: u64,
    /// Requests that produced a response
    pub requests: u64,
    /// Attempts repeated after a transient failure
    pub retries: u64,
    /// Sessions closed because the server required it
    pub forced_closes: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide sink used by clients unless told otherwise.
    pub fn global() -> Arc<Stats> {
        GLOBAL.get_or_init(|| Arc::new(Stats::new())).clone()
    }

    pub fn record_object(&self) {
        self.objects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced_close(&self) {
        self.forced_closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `None` until at least one client has been constructed.
    pub fn snapshot(&self) -> Option<StatsSnapshot> {
        let objects = self.objects.load(Ordering::Relaxed);
        if objects == 0 {
            return None;
        }

        Some(StatsSnapshot {
            objects,
            sessions: self.sessions.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            forced_closes: self.forced_closes.load(Ordering::Relaxed),
        })
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "objects={} sessions={} requests={} retries={} forced_closes={}",
            self.objects, self.sessions, self.requests, self.retries, self.forced_closes
        )
    }
}

/// Snapshot of the global sink.
pub fn snapshot() -> Option<StatsSnapshot> {
    Stats::global().snapshot()
}

/// Human-readable line for the global sink, or `None` if no client exists yet.
pub fn stats_text() -> Option<String> {
    snapshot().map(|s| s.to_string())
}
