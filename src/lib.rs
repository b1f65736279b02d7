// console-engine - reactive resource-orchestration engine for console frontends
//
// Library crate: paginated remote lists with stale-response protection,
// polling, parent/child cascades, multi-target mutation workflows and
// diff-and-commit association editing. Transport lives behind the traits in
// `services`.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use engine::{
    AssociationDiffEngine, CascadeResolver, EngineContext, FetchOptions, ListEngine, PollConfig,
    Ticket, WorkflowEngine,
};
pub use error::{EngineError, RemoteError, Result};
pub use metrics::Metrics;
pub use models::{
    AppConfig, EngineConfig, FetchOutcome, FetchState, Filter, Identify, ListSnapshot,
    OperationResult, OperationState, Page, Paging, QueryState, Record, RecordKey, WorkflowState,
};
pub use services::{Fetcher, OperationExecutor, PerTargetExecutor, SelectionMemory};
pub use state::{StateManager, TrackChanges};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
