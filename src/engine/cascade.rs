//! Parent → child list wiring.
//!
//! Selecting a record in the parent re-parameterizes and re-fetches the child.
//! When the parent finishes a fetch and its selection is no longer on the page,
//! a default is chosen: the remembered selection if it is on the page, else the
//! first record, else nothing. A child failure never touches the parent.

use crate::engine::list::{ListEngine, WeakListEngine};
use crate::models::{FetchOutcome, Filter, Identify, Record, RecordKey};
use crate::services::SelectionMemory;
use std::fmt;
use std::sync::Arc;

/// Pick the default selection for a freshly fetched page.
pub fn resolve_default_selection<'a, T: Identify>(
    records: &'a [T],
    remembered: Option<&RecordKey>,
) -> Option<&'a T> {
    remembered
        .and_then(|key| records.iter().find(|record| record.key() == *key))
        .or_else(|| records.first())
}

/// Handle on the wiring between a parent and a child list.
///
/// The wiring lives in hooks registered on the parent; this handle only
/// re-runs default resolution on demand. It holds both lists weakly.
pub struct CascadeResolver<P: Record, PF: Filter, C: Record, CF: Filter> {
    scope: String,
    parent: WeakListEngine<P, PF>,
    child: WeakListEngine<C, CF>,
    memory: Arc<dyn SelectionMemory>,
}

impl<P, PF, C, CF> CascadeResolver<P, PF, C, CF>
where
    P: Record,
    PF: Filter,
    C: Record,
    CF: Filter,
{
    /// Wire `parent` to `child`. `link` turns the selected parent into the
    /// child's filter patch; `scope` names the parent in `memory`.
    pub fn new<L>(
        parent: &ListEngine<P, PF>,
        child: &ListEngine<C, CF>,
        memory: Arc<dyn SelectionMemory>,
        scope: impl Into<String>,
        link: L,
    ) -> Self
    where
        L: Fn(&P) -> CF::Patch + Send + Sync + 'static,
    {
        let scope = scope.into();

        let finish_memory = Arc::clone(&memory);
        let finish_scope = scope.clone();
        parent.on_finish(move |parent, outcome| {
            if *outcome == FetchOutcome::Ready {
                apply_default(parent, finish_memory.as_ref(), &finish_scope);
            }
        });

        let weak_child = child.downgrade();
        let select_scope = scope.clone();
        parent.on_select(move |_, record| {
            let Some(child) = weak_child.upgrade() else {
                return;
            };
            match record {
                Some(record) => {
                    tracing::debug!(scope = %select_scope, key = %record.key(), "parent selected, refreshing child");
                    // Failures land in the child's snapshot; the parent selection stands
                    child.apply_filter(link(record));
                }
                None => child.clear(),
            }
        });

        Self {
            scope,
            parent: parent.downgrade(),
            child: child.downgrade(),
            memory,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Re-run default resolution against the parent's current page.
    ///
    /// Returns the key of the selection in effect afterwards.
    pub fn resolve(&self) -> Option<RecordKey> {
        let parent = self.parent.upgrade()?;
        apply_default(&parent, self.memory.as_ref(), &self.scope);
        parent.selection().map(|record| record.key())
    }

    pub fn child(&self) -> Option<ListEngine<C, CF>> {
        self.child.upgrade()
    }
}

impl<P: Record, PF: Filter, C: Record, CF: Filter> fmt::Debug for CascadeResolver<P, PF, C, CF> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadeResolver")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

fn apply_default<P: Record, PF: Filter>(
    parent: &ListEngine<P, PF>,
    memory: &dyn SelectionMemory,
    scope: &str,
) {
    let snapshot = parent.snapshot();
    if let Some(current) = parent.selection() {
        if snapshot.contains(&current.key()) {
            return;
        }
    }

    let remembered = memory.remembered(scope);
    let default = resolve_default_selection(snapshot.records(), remembered.as_ref()).cloned();
    tracing::debug!(
        %scope,
        remembered = ?remembered,
        selected = ?default.as_ref().map(|record| record.key()),
        "resolved default selection"
    );
    parent.select(default);
}
