use crate::error::{EngineError, RemoteError, Result};
use std::fmt;

/// Workflow lifecycle. Transitions run `Pending → Started → Performing → Done`;
/// `cancel` returns `Started`/`Performing` to `Pending`, `reset` returns `Done`
/// to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationState {
    #[default]
    Pending,
    Started,
    Performing,
    Done,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Performing => "performing",
            Self::Done => "done",
        })
    }
}

/// Outcome of one mutation against one target.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult<T> {
    pub success: bool,
    pub target: T,
    pub error: Option<RemoteError>,
}

impl<T> OperationResult<T> {
    pub fn succeeded(target: T) -> Self {
        Self {
            success: true,
            target,
            error: None,
        }
    }

    pub fn failed(target: T, error: RemoteError) -> Self {
        Self {
            success: false,
            target,
            error: Some(error),
        }
    }
}

/// State of one multi-target mutation.
///
/// Once `Done`, `results` holds exactly one entry per target, in target order.
#[derive(Debug, Clone)]
pub struct WorkflowState<T, P> {
    pub operation_state: OperationState,
    pub targets: Vec<T>,
    pub params: Option<P>,
    pub results: Vec<OperationResult<T>>,
    pub error: Option<RemoteError>,
    pub(crate) epoch: u64,
}

impl<T, P> Default for WorkflowState<T, P> {
    fn default() -> Self {
        Self {
            operation_state: OperationState::Pending,
            targets: Vec::new(),
            params: None,
            results: Vec::new(),
            error: None,
            epoch: 0,
        }
    }
}

impl<T, P> WorkflowState<T, P> {
    /// True iff the workflow is `Done` and every result succeeded.
    pub fn is_success(&self) -> bool {
        is_success_workflow(self)
    }

    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|result| !result.success).count()
    }

    /// `Err(PartialFailure)` when any settled result failed.
    pub fn check(&self) -> Result<()> {
        match self.failure_count() {
            0 => Ok(()),
            failed => Err(EngineError::PartialFailure {
                failed,
                total: self.results.len(),
            }),
        }
    }
}

impl<T: Clone, P> WorkflowState<T, P> {
    /// Targets whose mutation failed, for a fresh retry cycle.
    pub fn failed_targets(&self) -> Vec<T> {
        self.results
            .iter()
            .filter(|result| !result.success)
            .map(|result| result.target.clone())
            .collect()
    }
}

/// True iff `state` is `Done` and every result succeeded.
pub fn is_success_workflow<T, P>(state: &WorkflowState<T, P>) -> bool {
    state.operation_state == OperationState::Done && state.results.iter().all(|r| r.success)
}
