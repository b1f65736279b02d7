//! Error types for the orchestration engine.

use crate::models::OperationState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a remote collaborator (fetcher or operation executor).
///
/// Attached to list snapshots and workflow results for display; it never
/// unwinds across an engine boundary on its own.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteError {
    /// No response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response was received with failure semantics.
    #[error("server error {code}: {message}")]
    Server { code: u32, message: String },
}

impl RemoteError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn server(code: u32, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// True when the failure happened before any response arrived.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Errors raised by the engines themselves.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A settled workflow carried mixed per-target results.
    #[error("{failed} of {total} operations failed")]
    PartialFailure { failed: usize, total: usize },

    #[error("cannot {operation} while workflow is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: OperationState,
    },

    #[error("invalid paging: page index {page_index}, page size {page_size}")]
    InvalidPaging { page_index: u32, page_size: u32 },

    #[error("poll delay must be greater than zero")]
    InvalidPollDelay,

    #[error("association target has not been set up")]
    MissingAssociationTarget,

    #[error("an association change is already being committed")]
    AssociationInProgress,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
