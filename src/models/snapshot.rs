use crate::error::RemoteError;
use crate::models::{Identify, RecordKey};
use std::fmt;

/// Lifecycle of a list's most recent fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchState {
    #[default]
    Pending,
    Fetching,
    Ready,
    Failed,
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Ready => "ready",
            Self::Failed => "failed",
        })
    }
}

/// One page of remote records plus the total match count.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub record_count: u64,
    pub records: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(record_count: u64, records: Vec<T>) -> Self {
        Self {
            record_count,
            records,
        }
    }

    /// A page whose total is its own length.
    pub fn complete(records: Vec<T>) -> Self {
        Self {
            record_count: records.len() as u64,
            records,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            record_count: 0,
            records: Vec::new(),
        }
    }
}

/// Visible state of a remote list.
///
/// `data` always holds the last successfully fetched page, including while a
/// newer fetch is in flight or after one failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot<T> {
    pub fetch_state: FetchState,
    pub fetched: bool,
    pub data: Page<T>,
    pub error: Option<RemoteError>,
}

impl<T> Default for ListSnapshot<T> {
    fn default() -> Self {
        Self {
            fetch_state: FetchState::Pending,
            fetched: false,
            data: Page::default(),
            error: None,
        }
    }
}

impl<T> ListSnapshot<T> {
    pub fn is_loading(&self) -> bool {
        self.fetch_state == FetchState::Fetching
    }

    pub fn records(&self) -> &[T] {
        &self.data.records
    }
}

impl<T: Identify> ListSnapshot<T> {
    pub fn find(&self, key: &RecordKey) -> Option<&T> {
        self.data.records.iter().find(|record| record.key() == *key)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.find(key).is_some()
    }
}

/// How a fetch request settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was committed to the snapshot.
    Ready,
    /// The error was committed; the previous page stays visible.
    Failed(RemoteError),
    /// A newer query (or a reset) superseded the request; its result was dropped.
    Stale,
}

impl FetchOutcome {
    pub fn is_committed(&self) -> bool {
        !matches!(self, Self::Stale)
    }
}
