// Engine metrics
//
// Lock-free counters shared by every engine created from one EngineContext.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for fetch, poll and workflow activity.
#[derive(Debug)]
pub struct Metrics {
    /// Fetch requests handed to a fetcher
    pub fetches_issued: AtomicU64,

    /// Fetch calls folded into an identical in-flight request
    pub fetches_coalesced: AtomicU64,

    /// Fetches that settled with an error
    pub fetches_failed: AtomicU64,

    /// Responses dropped because a newer query superseded them
    pub stale_discarded: AtomicU64,

    /// Poll loop iterations
    pub poll_ticks: AtomicU64,

    pub workflows_completed: AtomicU64,

    /// Workflows that reached Done with at least one failed target
    pub workflows_failed: AtomicU64,

    pub workflows_cancelled: AtomicU64,

    /// Association confirms that ran to completion
    pub associations_committed: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fetches_issued: AtomicU64::new(0),
            fetches_coalesced: AtomicU64::new(0),
            fetches_failed: AtomicU64::new(0),
            stale_discarded: AtomicU64::new(0),
            poll_ticks: AtomicU64::new(0),
            workflows_completed: AtomicU64::new(0),
            workflows_failed: AtomicU64::new(0),
            workflows_cancelled: AtomicU64::new(0),
            associations_committed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_fetch_issued(&self) {
        self.fetches_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_coalesced(&self) {
        self.fetches_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failed(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_discarded(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_tick(&self) {
        self.poll_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a Done transition; `success` per `is_success_workflow`.
    pub fn record_workflow_done(&self, success: bool) {
        self.workflows_completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.workflows_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_workflow_cancelled(&self) {
        self.workflows_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_association_committed(&self) {
        self.associations_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Share of issued fetches whose response was discarded as stale.
    pub fn stale_ratio(&self) -> f64 {
        let issued = self.fetches_issued.load(Ordering::Relaxed);
        if issued == 0 {
            return 0.0;
        }
        self.stale_discarded.load(Ordering::Relaxed) as f64 / issued as f64
    }

    pub fn log_summary(&self) {
        tracing::info!(
            uptime_secs = self.uptime().as_secs_f64(),
            fetches_issued = self.fetches_issued.load(Ordering::Relaxed),
            fetches_coalesced = self.fetches_coalesced.load(Ordering::Relaxed),
            fetches_failed = self.fetches_failed.load(Ordering::Relaxed),
            stale_discarded = self.stale_discarded.load(Ordering::Relaxed),
            poll_ticks = self.poll_ticks.load(Ordering::Relaxed),
            "fetch metrics"
        );
        tracing::info!(
            completed = self.workflows_completed.load(Ordering::Relaxed),
            failed = self.workflows_failed.load(Ordering::Relaxed),
            cancelled = self.workflows_cancelled.load(Ordering::Relaxed),
            associations = self.associations_committed.load(Ordering::Relaxed),
            "workflow metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
