//! Diff-and-commit editing of many-to-many bindings.
//!
//! The associated list's fetched page is the diff baseline. Selections are
//! diffed against it by identity key; confirming runs the associate workflow
//! and, only if every add succeeded, the disassociate workflow for the
//! removals. Afterwards the associated list is re-fetched and the caller's
//! completion callback runs.

use crate::engine::EngineContext;
use crate::engine::list::{FetchOptions, ListEngine};
use crate::engine::ticket::{Completer, Ticket, ticket};
use crate::engine::workflow::WorkflowEngine;
use crate::error::{EngineError, Result};
use crate::metrics::Metrics;
use crate::models::{
    AssociationFilter, AssociationState, AssociationTarget, FetchOutcome, Filter, OperationResult,
    Payload, Record, WorkflowState,
};
use crate::state::{StateManager, TrackChanges, lock};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::Instrument;

/// Results of one confirmed association change.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationOutcome<T> {
    pub associate: Vec<OperationResult<T>>,
    /// `None` when the disassociate step did not run.
    pub disassociate: Option<Vec<OperationResult<T>>>,
}

impl<T> AssociationOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.associate.iter().all(|result| result.success)
            && self
                .disassociate
                .as_ref()
                .is_none_or(|results| results.iter().all(|result| result.success))
    }
}

/// Invoked once per confirmed change, after the associated list was re-fetched.
pub type CompletionCallback<T> = Arc<dyn Fn(&AssociationOutcome<T>) + Send + Sync>;

/// Change events broadcast by an [`AssociationDiffEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum AssociationChange {
    BaselineChanged { count: usize },
    SelectionChanged { count: usize },
    DiffChanged { add: usize, remove: usize },
}

impl<T: Record> TrackChanges for AssociationState<T> {
    type Change = AssociationChange;

    fn detect_changes(old: &Self, new: &Self) -> Vec<AssociationChange> {
        let mut changes = Vec::new();

        if old.origin_items != new.origin_items {
            changes.push(AssociationChange::BaselineChanged {
                count: new.origin_items.len(),
            });
        }
        if old.items != new.items {
            changes.push(AssociationChange::SelectionChanged {
                count: new.items.len(),
            });
        }
        if old.add_items != new.add_items || old.remove_items != new.remove_items {
            changes.push(AssociationChange::DiffChanged {
                add: new.add_items.len(),
                remove: new.remove_items.len(),
            });
        }

        changes
    }
}

struct Session<T> {
    target: Option<AssociationTarget>,
    on_complete: Option<CompletionCallback<T>>,
    pending_removals: Vec<T>,
    associate_results: Vec<OperationResult<T>>,
    completer: Option<Completer<AssociationOutcome<T>>>,
}

impl<T> Default for Session<T> {
    fn default() -> Self {
        Self {
            target: None,
            on_complete: None,
            pending_removals: Vec::new(),
            associate_results: Vec::new(),
            completer: None,
        }
    }
}

struct AssociationInner<T: Record, F: Filter> {
    name: String,
    candidates: ListEngine<T, F>,
    associated: ListEngine<T, AssociationFilter>,
    state: StateManager<AssociationState<T>>,
    associate: WorkflowEngine<T, AssociationTarget>,
    disassociate: WorkflowEngine<T, AssociationTarget>,
    session: Mutex<Session<T>>,
    metrics: Arc<Metrics>,
}

/// Edits the bindings between one target resource and a pool of candidates.
///
/// The associated list must fetch every binding of the target in one page;
/// records outside the fetched page are not part of the baseline.
pub struct AssociationDiffEngine<T: Record, F: Filter> {
    inner: Arc<AssociationInner<T, F>>,
}

impl<T: Record, F: Filter> Clone for AssociationDiffEngine<T, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Record, F: Filter> fmt::Debug for AssociationDiffEngine<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationDiffEngine")
            .field("name", &self.inner.name)
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

impl<T: Record, F: Filter> AssociationDiffEngine<T, F> {
    /// Compose the engine and wire its hooks.
    ///
    /// Takes over the `Done` hooks of both workflows; they are reset after
    /// every run.
    pub fn new(
        ctx: &EngineContext,
        name: impl Into<String>,
        candidates: ListEngine<T, F>,
        associated: ListEngine<T, AssociationFilter>,
        associate: WorkflowEngine<T, AssociationTarget>,
        disassociate: WorkflowEngine<T, AssociationTarget>,
    ) -> Self {
        let state = StateManager::new(AssociationState::default(), ctx.config.event_capacity);

        let baseline = state.clone();
        associated.on_finish(move |list, outcome| {
            if *outcome == FetchOutcome::Ready {
                baseline.replace(AssociationState::from_origin(list.snapshot().data.records));
            }
        });

        let engine = Self {
            inner: Arc::new(AssociationInner {
                name: name.into(),
                candidates,
                associated,
                state,
                associate,
                disassociate,
                session: Mutex::new(Session::default()),
                metrics: Arc::clone(&ctx.metrics),
            }),
        };

        let weak = Arc::downgrade(&engine.inner);
        engine.inner.associate.on_done(move |workflow, state| {
            if let Err(error) = workflow.reset() {
                tracing::error!(%error, "failed to reset associate workflow");
            }
            if let Some(inner) = weak.upgrade() {
                AssociationDiffEngine { inner }.after_associate(state);
            }
        });

        let weak = Arc::downgrade(&engine.inner);
        engine.inner.disassociate.on_done(move |workflow, state| {
            if let Err(error) = workflow.reset() {
                tracing::error!(%error, "failed to reset disassociate workflow");
            }
            if let Some(inner) = weak.upgrade() {
                AssociationDiffEngine { inner }.finish(Some(state.results.clone()));
            }
        });

        engine
    }

    /// Point the engine at `target` and load its current bindings.
    ///
    /// The selection buffer is cleared until the associated list answers.
    pub fn setup_filter(
        &self,
        target: AssociationTarget,
        on_complete: Option<CompletionCallback<T>>,
    ) -> Ticket<FetchOutcome> {
        {
            let mut session = lock(&self.inner.session);
            session.target = Some(target.clone());
            session.on_complete = on_complete;
        }
        tracing::debug!(engine = %self.inner.name, resource = %target.resource, id = %target.resource_id, "association target set");

        self.inner.state.replace(AssociationState::default());
        self.inner.associated.apply_filter(Some(target))
    }

    /// Replace the selection and recompute the diff against the baseline.
    pub fn select_items(&self, selection: Vec<T>) {
        self.inner.state.update(|state| state.select(selection));
    }

    /// Commit the current diff.
    ///
    /// Adds run first; removals run only if every add succeeded. The ticket
    /// settles after the associated list was re-fetched.
    pub fn confirm(&self) -> Result<Ticket<AssociationOutcome<T>>> {
        let (add, remove) = self
            .inner
            .state
            .read(|state| (state.add_items.clone(), state.remove_items.clone()));

        let (add_count, remove_count) = (add.len(), remove.len());

        let (completer, ticket) = ticket();
        let target = {
            let mut session = lock(&self.inner.session);
            let target = session
                .target
                .clone()
                .ok_or(EngineError::MissingAssociationTarget)?;
            if session.completer.is_some() {
                return Err(EngineError::AssociationInProgress);
            }
            session.completer = Some(completer);
            session.pending_removals = remove;
            session.associate_results.clear();
            target
        };

        tracing::info!(
            engine = %self.inner.name,
            add = add_count,
            remove = remove_count,
            "confirming association change"
        );

        if let Err(error) = self.inner.associate.start(add, target) {
            self.abandon();
            return Err(error);
        }
        if let Err(error) = self.inner.associate.perform() {
            stop(&self.inner.name, &self.inner.associate);
            self.abandon();
            return Err(error);
        }

        Ok(ticket)
    }

    /// Abandon an in-progress confirm. Its ticket settles with `None`.
    ///
    /// Remote calls already dispatched may still take effect.
    pub fn cancel(&self) {
        stop(&self.inner.name, &self.inner.associate);
        stop(&self.inner.name, &self.inner.disassociate);
        if self.abandon() {
            tracing::info!(engine = %self.inner.name, "association change cancelled");
        }
    }

    pub fn state(&self) -> AssociationState<T> {
        self.inner.state.snapshot()
    }

    pub fn target(&self) -> Option<AssociationTarget> {
        lock(&self.inner.session).target.clone()
    }

    pub fn is_confirming(&self) -> bool {
        lock(&self.inner.session).completer.is_some()
    }

    pub fn candidates(&self) -> &ListEngine<T, F> {
        &self.inner.candidates
    }

    pub fn associated(&self) -> &ListEngine<T, AssociationFilter> {
        &self.inner.associated
    }

    pub fn associate_workflow(&self) -> &WorkflowEngine<T, AssociationTarget> {
        &self.inner.associate
    }

    pub fn disassociate_workflow(&self) -> &WorkflowEngine<T, AssociationTarget> {
        &self.inner.disassociate
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssociationChange> {
        self.inner.state.subscribe()
    }

    fn after_associate(&self, state: &WorkflowState<T, AssociationTarget>) {
        let (removals, target) = {
            let mut session = lock(&self.inner.session);
            if session.completer.is_none() {
                return;
            }
            session.associate_results = state.results.clone();
            (std::mem::take(&mut session.pending_removals), session.target.clone())
        };

        if !state.is_success() {
            tracing::warn!(
                engine = %self.inner.name,
                failed = state.failure_count(),
                skipped = removals.len(),
                "associate step failed, removals not attempted"
            );
            self.finish(None);
            return;
        }

        let Some(target) = target.filter(|_| !removals.is_empty()) else {
            self.finish(None);
            return;
        };

        let started = self
            .inner
            .disassociate
            .start(removals, target)
            .and_then(|()| self.inner.disassociate.perform());
        if let Err(error) = started {
            tracing::error!(engine = %self.inner.name, %error, "could not run disassociate step");
            stop(&self.inner.name, &self.inner.disassociate);
            self.finish(None);
        }
    }

    fn finish(&self, disassociate: Option<Vec<OperationResult<T>>>) {
        let (completer, callback, associate) = {
            let mut session = lock(&self.inner.session);
            (
                session.completer.take(),
                session.on_complete.clone(),
                std::mem::take(&mut session.associate_results),
            )
        };
        let Some(completer) = completer else {
            return;
        };

        let outcome = AssociationOutcome {
            associate,
            disassociate,
        };
        let refresh = self.inner.associated.fetch(FetchOptions::no_cache());
        let metrics = Arc::clone(&self.inner.metrics);
        let span = tracing::info_span!("association_commit", engine = %self.inner.name);

        tokio::spawn(
            async move {
                if let Some(FetchOutcome::Failed(error)) = refresh.settled().await {
                    tracing::warn!(%error, "refresh after association change failed");
                }
                if let Some(callback) = callback {
                    callback(&outcome);
                }
                tracing::info!(success = outcome.is_success(), "association change committed");
                metrics.record_association_committed();
                completer.complete(outcome);
            }
            .instrument(span),
        );
    }

    /// Drop the pending confirm, if any. True if there was one.
    fn abandon(&self) -> bool {
        let mut session = lock(&self.inner.session);
        session.pending_removals.clear();
        session.associate_results.clear();
        session.completer.take().is_some()
    }
}

/// Cancel `workflow` if it is running. Idle workflows are left alone.
fn stop<T: Payload>(engine: &str, workflow: &WorkflowEngine<T, AssociationTarget>) {
    match workflow.cancel() {
        Ok(()) => tracing::debug!(engine, workflow = workflow.name(), "workflow cancelled"),
        Err(EngineError::InvalidTransition { state, .. }) => {
            tracing::debug!(engine, workflow = workflow.name(), %state, "workflow not running");
        }
        Err(error) => tracing::warn!(engine, workflow = workflow.name(), %error, "could not cancel workflow"),
    }
}
