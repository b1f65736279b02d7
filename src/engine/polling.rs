//! Fixed-delay re-fetch loops gated by a continuation predicate.
//!
//! A scheduler owns at most one loop. The loop holds only a `Weak` reference
//! to its target, so dropping the engine ends it; re-arming or clearing aborts
//! the previous loop and bumps the generation so a late wake-up is ignored.

use crate::engine::ticket::Ticket;
use crate::error::{EngineError, Result};
use crate::metrics::Metrics;
use crate::models::FetchOutcome;
use crate::state::lock;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Something a poll loop can refresh.
pub trait Pollable: Send + Sync + 'static {
    type Snapshot: Send + 'static;

    /// Dispatch one refresh.
    fn begin_poll(this: &Arc<Self>) -> Ticket<FetchOutcome>;

    fn poll_snapshot(&self) -> Self::Snapshot;
}

type ContinuePredicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// Delay between ticks and the predicate deciding whether to keep going.
pub struct PollConfig<S> {
    delay: Duration,
    should_continue: ContinuePredicate<S>,
}

impl<S> PollConfig<S> {
    pub fn new<P>(delay: Duration, should_continue: P) -> Result<Self>
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
    {
        if delay.is_zero() {
            return Err(EngineError::InvalidPollDelay);
        }
        Ok(Self {
            delay,
            should_continue: Arc::new(should_continue),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<S> Clone for PollConfig<S> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            should_continue: Arc::clone(&self.should_continue),
        }
    }
}

impl<S> fmt::Debug for PollConfig<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollConfig").field("delay", &self.delay).finish_non_exhaustive()
    }
}

/// The armed loop of one scheduler.
#[derive(Debug)]
pub struct PollHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn cancel(self) {
        self.task.abort();
    }
}

#[derive(Debug, Default)]
struct PollSlot {
    generation: u64,
    handle: Option<PollHandle>,
}

/// Owns the poll loop of one engine instance.
#[derive(Debug)]
pub struct PollingScheduler {
    name: String,
    slot: Arc<Mutex<PollSlot>>,
    metrics: Arc<Metrics>,
}

impl PollingScheduler {
    pub fn new(name: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            name: name.into(),
            slot: Arc::new(Mutex::new(PollSlot::default())),
            metrics,
        }
    }

    /// Start polling `target`, replacing any loop already armed.
    ///
    /// The first refresh is dispatched before this returns.
    pub fn arm<P: Pollable>(&self, target: &Arc<P>, config: PollConfig<P::Snapshot>) {
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.handle.take() {
            tracing::debug!(engine = %self.name, generation = previous.generation, "replacing poll loop");
            previous.cancel();
        }
        slot.generation += 1;
        let generation = slot.generation;

        let first = P::begin_poll(target);
        self.metrics.record_poll_tick();

        let span = tracing::debug_span!("poll", engine = %self.name, generation);
        let task = tokio::spawn(
            poll_loop(
                Arc::downgrade(target),
                config,
                first,
                Arc::clone(&self.slot),
                generation,
                Arc::clone(&self.metrics),
            )
            .instrument(span),
        );
        slot.handle = Some(PollHandle { generation, task });
    }

    /// Cancel the armed loop, if any. Idempotent.
    pub fn clear(&self) {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        if let Some(handle) = slot.handle.take() {
            tracing::debug!(engine = %self.name, generation = handle.generation, "poll loop cleared");
            handle.cancel();
        }
    }

    /// Number of armed loops: zero or one.
    pub fn active_timers(&self) -> usize {
        usize::from(lock(&self.slot).handle.is_some())
    }

    pub fn is_polling(&self) -> bool {
        self.active_timers() > 0
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.slot).handle.take() {
            handle.cancel();
        }
    }
}

fn is_live(slot: &Mutex<PollSlot>, generation: u64) -> bool {
    lock(slot).generation == generation
}

async fn poll_loop<P: Pollable>(
    target: Weak<P>,
    config: PollConfig<P::Snapshot>,
    first: Ticket<FetchOutcome>,
    slot: Arc<Mutex<PollSlot>>,
    generation: u64,
    metrics: Arc<Metrics>,
) {
    let mut pending = first;
    loop {
        let outcome = pending.settled().await;
        if !is_live(&slot, generation) {
            return;
        }

        let Some(engine) = target.upgrade() else {
            tracing::debug!("poll target dropped");
            break;
        };

        // A superseded refresh says nothing about the current data; keep polling
        if outcome != Some(FetchOutcome::Stale) {
            let snapshot = engine.poll_snapshot();
            if !(config.should_continue)(&snapshot) {
                tracing::debug!("poll condition settled");
                break;
            }
        }
        drop(engine);

        tokio::time::sleep(config.delay).await;
        if !is_live(&slot, generation) {
            return;
        }

        let Some(engine) = target.upgrade() else {
            break;
        };
        pending = P::begin_poll(&engine);
        metrics.record_poll_tick();
    }

    let mut slot = lock(&slot);
    if slot.generation == generation {
        slot.handle = None;
    }
}
