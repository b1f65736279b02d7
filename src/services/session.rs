use crate::models::RecordKey;
use crate::state::lock;
use std::collections::HashMap;
use std::sync::Mutex;

/// Read access to sticky selections persisted by navigation or the session.
///
/// `scope` names a dependent list ("region", "cluster", ...). The engine only
/// reads; whoever owns navigation writes.
#[cfg_attr(test, mockall::automock)]
pub trait SelectionMemory: Send + Sync {
    fn remembered(&self, scope: &str) -> Option<RecordKey>;
}

/// Memory that never remembers anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMemory;

impl SelectionMemory for NoMemory {
    fn remembered(&self, _scope: &str) -> Option<RecordKey> {
        None
    }
}

/// In-process selection memory for applications without URL state.
#[derive(Debug, Default)]
pub struct SessionSelections {
    entries: Mutex<HashMap<String, RecordKey>>,
}

impl SessionSelections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, scope: impl Into<String>, key: impl Into<RecordKey>) {
        lock(&self.entries).insert(scope.into(), key.into());
    }

    pub fn forget(&self, scope: &str) -> Option<RecordKey> {
        lock(&self.entries).remove(scope)
    }
}

impl SelectionMemory for SessionSelections {
    fn remembered(&self, scope: &str) -> Option<RecordKey> {
        lock(&self.entries).get(scope).cloned()
    }
}
