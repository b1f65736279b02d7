use crate::models::{Filter, Identify, RecordKey};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The resource whose bindings are being edited, e.g. `("user", "alice")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssociationTarget {
    pub resource: String,
    pub resource_id: RecordKey,
}

impl AssociationTarget {
    pub fn new(resource: impl Into<String>, resource_id: impl Into<RecordKey>) -> Self {
        Self {
            resource: resource.into(),
            resource_id: resource_id.into(),
        }
    }
}

/// Filter of the "already associated" list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationFilter {
    pub target: Option<AssociationTarget>,
}

impl Filter for AssociationFilter {
    type Patch = Option<AssociationTarget>;

    fn merge(&mut self, patch: Option<AssociationTarget>) {
        self.target = patch;
    }
}

/// Selection buffer plus its diff against the server-confirmed baseline.
///
/// `origin_items` changes only through [`from_origin`](Self::from_origin);
/// [`select`](Self::select) recomputes `add_items` and `remove_items` from it.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationState<T> {
    pub items: Vec<T>,
    pub origin_items: Vec<T>,
    pub add_items: Vec<T>,
    pub remove_items: Vec<T>,
}

impl<T> Default for AssociationState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            origin_items: Vec::new(),
            add_items: Vec::new(),
            remove_items: Vec::new(),
        }
    }
}

impl<T: Identify + Clone> AssociationState<T> {
    /// Baseline from a fresh fetch of the associated list.
    pub fn from_origin(fetched: Vec<T>) -> Self {
        let origin = dedup_by_key(fetched);
        Self {
            items: origin.clone(),
            origin_items: origin,
            add_items: Vec::new(),
            remove_items: Vec::new(),
        }
    }

    pub fn select(&mut self, selection: Vec<T>) {
        let items = dedup_by_key(selection);
        self.add_items = difference(&items, &self.origin_items);
        self.remove_items = difference(&self.origin_items, &items);
        self.items = items;
    }

    pub fn has_changes(&self) -> bool {
        !self.add_items.is_empty() || !self.remove_items.is_empty()
    }
}

/// `left \ right` by identity key, first occurrence order, no duplicates.
pub fn difference<T: Identify + Clone>(left: &[T], right: &[T]) -> Vec<T> {
    let excluded: HashSet<RecordKey> = right.iter().map(Identify::key).collect();
    let mut kept: IndexMap<RecordKey, T> = IndexMap::with_capacity(left.len());
    for item in left {
        let key = item.key();
        if !excluded.contains(&key) {
            kept.entry(key).or_insert_with(|| item.clone());
        }
    }
    kept.into_values().collect()
}

fn dedup_by_key<T: Identify>(items: Vec<T>) -> Vec<T> {
    let mut unique: IndexMap<RecordKey, T> = IndexMap::with_capacity(items.len());
    for item in items {
        unique.entry(item.key()).or_insert(item);
    }
    unique.into_values().collect()
}
