//! Engine module - the reactive state machines built on [`StateManager`](crate::state::StateManager).
//!
//! - [`ListEngine`]: query, fetch, selection and polling for one remote list
//! - [`PollingScheduler`]: at most one fixed-delay refresh loop per engine
//! - [`CascadeResolver`]: parent selection drives a child list's filter
//! - [`WorkflowEngine`]: `Pending → Started → Performing → Done` mutation lifecycle
//! - [`AssociationDiffEngine`]: diff-and-commit editing of many-to-many bindings
//!
//! Asynchronous calls return a [`Ticket`] immediately; the work runs on the
//! tokio runtime whether or not the ticket is awaited.

pub mod association;
mod cache;
pub mod cascade;
pub mod list;
pub mod polling;
pub mod ticket;
pub mod workflow;

pub use association::{
    AssociationChange, AssociationDiffEngine, AssociationOutcome, CompletionCallback,
};
pub use cache::FetchCache;
pub use cascade::{CascadeResolver, resolve_default_selection};
pub use list::{FetchOptions, ListChange, ListEngine, ListState, WeakListEngine};
pub use polling::{PollConfig, PollHandle, Pollable, PollingScheduler};
pub use ticket::Ticket;
pub use workflow::{WorkflowChange, WorkflowEngine, WorkflowOutcome};

use crate::metrics::Metrics;
use crate::models::EngineConfig;
use std::sync::Arc;

/// Configuration and metrics shared by every engine of one application.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub metrics: Arc<Metrics>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(Metrics::new()),
        }
    }
}
