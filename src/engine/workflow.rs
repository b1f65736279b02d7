//! Multi-target mutation lifecycle.
//!
//! `Pending → Started → Performing → Done`, then back to `Pending` through
//! [`WorkflowEngine::reset`]. [`WorkflowEngine::cancel`] abandons a started or
//! performing run locally; a late executor response for a cancelled run is
//! ignored through the state's epoch.

use crate::engine::EngineContext;
use crate::engine::ticket::{Completer, Ticket, ticket};
use crate::error::{EngineError, RemoteError, Result};
use crate::metrics::Metrics;
use crate::models::{OperationResult, OperationState, Payload, WorkflowState};
use crate::services::OperationExecutor;
use crate::state::{StateManager, TrackChanges, lock};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::Instrument;

/// How a [`WorkflowEngine::perform`] call settled.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome<T> {
    /// The run reached `Done`; one result per target, in target order.
    Done(Vec<OperationResult<T>>),
    /// The run was cancelled before its results were applied.
    Cancelled,
}

impl<T> WorkflowOutcome<T> {
    pub fn is_success(&self) -> bool {
        match self {
            Self::Done(results) => results.iter().all(|result| result.success),
            Self::Cancelled => false,
        }
    }

    pub fn results(&self) -> &[OperationResult<T>] {
        match self {
            Self::Done(results) => results,
            Self::Cancelled => &[],
        }
    }
}

/// Change events broadcast by a [`WorkflowEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowChange {
    StateChanged {
        from: OperationState,
        to: OperationState,
    },
    TargetsChanged {
        count: usize,
    },
    ResultsChanged {
        succeeded: usize,
        failed: usize,
    },
    ErrorChanged(Option<RemoteError>),
}

impl<T: Payload, P: Payload> TrackChanges for WorkflowState<T, P> {
    type Change = WorkflowChange;

    fn detect_changes(old: &Self, new: &Self) -> Vec<WorkflowChange> {
        let mut changes = Vec::new();

        if old.operation_state != new.operation_state {
            changes.push(WorkflowChange::StateChanged {
                from: old.operation_state,
                to: new.operation_state,
            });
        }
        if old.targets.len() != new.targets.len() {
            changes.push(WorkflowChange::TargetsChanged {
                count: new.targets.len(),
            });
        }
        let failed = new.failure_count();
        if old.results.len() != new.results.len() || old.failure_count() != failed {
            changes.push(WorkflowChange::ResultsChanged {
                succeeded: new.results.len() - failed,
                failed,
            });
        }
        if old.error != new.error {
            changes.push(WorkflowChange::ErrorChanged(new.error.clone()));
        }

        changes
    }
}

type WorkflowHook<T, P> = Arc<dyn Fn(&WorkflowEngine<T, P>, &WorkflowState<T, P>) + Send + Sync>;

struct Run<T> {
    epoch: u64,
    completer: Completer<WorkflowOutcome<T>>,
    /// Aborts the executor call; its watcher then sees a cancelled run.
    task: Option<AbortHandle>,
}

struct WorkflowInner<T: Payload, P: Payload> {
    name: String,
    state: StateManager<WorkflowState<T, P>>,
    executor: Arc<dyn OperationExecutor<T, P>>,
    hooks: Mutex<Vec<(OperationState, WorkflowHook<T, P>)>>,
    run: Mutex<Option<Run<T>>>,
    metrics: Arc<Metrics>,
}

/// Client-side state machine around one remote multi-target mutation.
///
/// Cheap to clone; clones share the same state.
pub struct WorkflowEngine<T: Payload, P: Payload> {
    inner: Arc<WorkflowInner<T, P>>,
}

impl<T: Payload, P: Payload> Clone for WorkflowEngine<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload, P: Payload> fmt::Debug for WorkflowEngine<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("name", &self.inner.name)
            .field("operation_state", &self.operation_state())
            .finish_non_exhaustive()
    }
}

impl<T: Payload, P: Payload> WorkflowEngine<T, P> {
    pub fn new(
        ctx: &EngineContext,
        name: impl Into<String>,
        executor: impl OperationExecutor<T, P> + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(WorkflowInner {
                name: name.into(),
                state: StateManager::new(WorkflowState::default(), ctx.config.event_capacity),
                executor: Arc::new(executor),
                hooks: Mutex::new(Vec::new()),
                run: Mutex::new(None),
                metrics: Arc::clone(&ctx.metrics),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `Pending → Started`: record targets and params. No network call.
    pub fn start(&self, targets: Vec<T>, params: P) -> Result<()> {
        let count = targets.len();
        let (result, _) = self.inner.state.update_with(|state| {
            if state.operation_state != OperationState::Pending {
                return Err(invalid("start", state.operation_state));
            }
            state.operation_state = OperationState::Started;
            state.targets = targets;
            state.params = Some(params);
            state.results.clear();
            state.error = None;
            Ok(state.clone())
        });
        let state = result?;

        tracing::info!(workflow = %self.inner.name, targets = count, "workflow started");
        self.fire(&state);
        Ok(())
    }

    /// `Started → Performing`: hand targets and params to the executor.
    ///
    /// The returned ticket settles when the run reaches `Done` or is
    /// cancelled. With no targets the run is `Done` before this returns.
    pub fn perform(&self) -> Result<Ticket<WorkflowOutcome<T>>> {
        let (result, _) = self.inner.state.update_with(|state| {
            if state.operation_state != OperationState::Started {
                return Err(invalid("perform", state.operation_state));
            }
            let params = state
                .params
                .clone()
                .ok_or_else(|| invalid("perform", state.operation_state))?;
            state.operation_state = OperationState::Performing;
            Ok((state.targets.clone(), params, state.epoch, state.clone()))
        });
        let (targets, params, epoch, performing) = result?;

        tracing::info!(workflow = %self.inner.name, targets = targets.len(), "workflow performing");
        self.fire(&performing);

        let (completer, ticket) = ticket();
        *lock(&self.inner.run) = Some(Run {
            epoch,
            completer,
            task: None,
        });

        if targets.is_empty() {
            self.finish(epoch, Ok(Vec::new()));
            return Ok(ticket);
        }

        let engine = self.clone();
        let executor = Arc::clone(&self.inner.executor);
        let span = tracing::info_span!("workflow", name = %self.inner.name, epoch);
        let call = tokio::spawn(
            async move { executor.execute(targets, params).await }.instrument(span.clone()),
        );

        if let Some(run) = lock(&self.inner.run).as_mut() {
            if run.epoch == epoch {
                run.task = Some(call.abort_handle());
            }
        }

        tokio::spawn(
            async move {
                let result = match call.await {
                    Ok(result) => result,
                    Err(join_error) => {
                        if !join_error.is_cancelled() {
                            tracing::error!(%join_error, "executor task aborted");
                        }
                        Err(RemoteError::transport(join_error.to_string()))
                    }
                };
                engine.finish(epoch, result);
            }
            .instrument(span),
        );

        Ok(ticket)
    }

    /// `Started | Performing → Pending`.
    ///
    /// The executor call, if any, is aborted best-effort; the remote side may
    /// still have applied it. Its results are never recorded.
    pub fn cancel(&self) -> Result<()> {
        let (result, _) = self.inner.state.update_with(|state| match state.operation_state {
            OperationState::Started | OperationState::Performing => {
                let from = state.operation_state;
                state.operation_state = OperationState::Pending;
                state.epoch += 1;
                state.targets.clear();
                state.params = None;
                state.results.clear();
                state.error = None;
                Ok((from, state.clone()))
            }
            other => Err(invalid("cancel", other)),
        });
        let (from, state) = result?;

        if let Some(run) = lock(&self.inner.run).take() {
            if let Some(task) = run.task {
                task.abort();
            }
            run.completer.complete(WorkflowOutcome::Cancelled);
        }

        tracing::info!(workflow = %self.inner.name, %from, "workflow cancelled");
        self.inner.metrics.record_workflow_cancelled();
        self.fire(&state);
        Ok(())
    }

    /// `Done → Pending`, clearing targets, params and results.
    pub fn reset(&self) -> Result<()> {
        let (result, _) = self.inner.state.update_with(|state| {
            if state.operation_state != OperationState::Done {
                return Err(invalid("reset", state.operation_state));
            }
            state.operation_state = OperationState::Pending;
            state.targets.clear();
            state.params = None;
            state.results.clear();
            state.error = None;
            Ok(state.clone())
        });
        let state = result?;

        tracing::debug!(workflow = %self.inner.name, "workflow reset");
        self.fire(&state);
        Ok(())
    }

    /// Run `hook` once every time the workflow enters `trigger`.
    ///
    /// Hooks run after the transition is visible, with no lock held, so they
    /// may drive this or any other engine.
    pub fn after<H>(&self, trigger: OperationState, hook: H)
    where
        H: Fn(&WorkflowEngine<T, P>, &WorkflowState<T, P>) + Send + Sync + 'static,
    {
        lock(&self.inner.hooks).push((trigger, Arc::new(hook)));
    }

    /// Shorthand for `after(OperationState::Done, hook)`.
    ///
    /// A `Done` hook is expected to [`reset`](Self::reset) the workflow
    /// eventually; until then `start` is rejected.
    pub fn on_done<H>(&self, hook: H)
    where
        H: Fn(&WorkflowEngine<T, P>, &WorkflowState<T, P>) + Send + Sync + 'static,
    {
        self.after(OperationState::Done, hook);
    }

    pub fn state(&self) -> WorkflowState<T, P> {
        self.inner.state.snapshot()
    }

    pub fn operation_state(&self) -> OperationState {
        self.inner.state.read(|state| state.operation_state)
    }

    pub fn is_success(&self) -> bool {
        self.inner.state.read(WorkflowState::is_success)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowChange> {
        self.inner.state.subscribe()
    }

    fn finish(
        &self,
        epoch: u64,
        result: std::result::Result<Vec<OperationResult<T>>, RemoteError>,
    ) {
        let (done, _) = self.inner.state.update_with(|state| {
            if state.epoch != epoch || state.operation_state != OperationState::Performing {
                return None;
            }
            match result {
                Ok(results) => {
                    state.results = normalise(&state.targets, results);
                    state.error = None;
                }
                Err(error) => {
                    state.results = state
                        .targets
                        .iter()
                        .map(|target| OperationResult::failed(target.clone(), error.clone()))
                        .collect();
                    state.error = Some(error);
                }
            }
            state.operation_state = OperationState::Done;
            Some(state.clone())
        });

        let Some(state) = done else {
            tracing::debug!(workflow = %self.inner.name, epoch, "ignoring results of cancelled run");
            return;
        };

        let success = state.is_success();
        self.inner.metrics.record_workflow_done(success);
        match state.check() {
            Ok(()) => tracing::info!(
                workflow = %self.inner.name,
                targets = state.targets.len(),
                "workflow done"
            ),
            Err(error) => tracing::warn!(workflow = %self.inner.name, %error, "workflow done with failures"),
        }

        let run = lock(&self.inner.run).take();
        self.fire(&state);

        if let Some(run) = run {
            if run.epoch == epoch {
                run.completer.complete(WorkflowOutcome::Done(state.results));
            }
        }
    }

    fn fire(&self, state: &WorkflowState<T, P>) {
        let hooks: Vec<WorkflowHook<T, P>> = lock(&self.inner.hooks)
            .iter()
            .filter(|(trigger, _)| *trigger == state.operation_state)
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook(self, state);
        }
    }
}

fn invalid(operation: &'static str, state: OperationState) -> EngineError {
    EngineError::InvalidTransition { operation, state }
}

/// One result per target, in target order. Results are matched by position;
/// surplus entries are dropped and missing ones become failures.
fn normalise<T: Payload>(targets: &[T], results: Vec<OperationResult<T>>) -> Vec<OperationResult<T>> {
    if results.len() != targets.len() {
        tracing::warn!(
            expected = targets.len(),
            received = results.len(),
            "executor result count does not match targets"
        );
    }
    let mut results = results.into_iter();
    targets
        .iter()
        .map(|target| {
            results.next().unwrap_or_else(|| {
                OperationResult::failed(target.clone(), RemoteError::transport("no result reported"))
            })
        })
        .collect()
}
