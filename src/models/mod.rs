//! Data model of the orchestration engine.
//!
//! - [`QueryState`]: immutable "which page of which filtered data" value
//! - [`ListSnapshot`]: visible state of a remote list (stale-while-revalidate)
//! - [`WorkflowState`]: lifecycle and per-target results of one mutation
//! - [`AssociationState`]: selection buffer diffed against a server baseline
//! - [`AppConfig`]: engine and logging configuration loaded from YAML
//!
//! Records are identified through [`Identify`]; every set operation and record
//! lookup goes through [`RecordKey`], never structural equality.

pub mod association;
pub mod config;
pub mod key;
pub mod query;
pub mod snapshot;
pub mod workflow;

pub use association::{AssociationFilter, AssociationState, AssociationTarget, difference};
pub use config::{AppConfig, EngineConfig, LoggingConfig};
pub use key::{Identify, Payload, Record, RecordKey};
pub use query::{Filter, Paging, QueryState, ScopeFilter};
pub use snapshot::{FetchOutcome, FetchState, ListSnapshot, Page};
pub use workflow::{OperationResult, OperationState, WorkflowState, is_success_workflow};
