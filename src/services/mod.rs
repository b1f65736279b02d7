//! Services module - seams to the collaborators the engine drives but does not own.
//!
//! - [`Fetcher`]: loads one page of records for a [`QueryState`](crate::models::QueryState)
//! - [`OperationExecutor`]: runs one multi-target mutation, reporting a result per target
//! - [`PerTargetExecutor`]: builds an executor from a single-target mutation, bounded by a semaphore
//! - [`SelectionMemory`]: reads sticky selections from navigation/session state
//!
//! Transport, authentication and serialization live behind these traits. Closures
//! implement [`Fetcher`] and [`OperationExecutor`] directly, which is how tests and
//! most feature modules supply them.

pub mod executor;
pub mod fetcher;
pub mod session;

pub use executor::{OperationExecutor, PerTargetExecutor};
pub use fetcher::Fetcher;
pub use session::{NoMemory, SelectionMemory, SessionSelections};
