use crate::error::{EngineError, Result};
use crate::models::RecordKey;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Filter criteria for one resource list.
///
/// Partial updates go through a typed [`Patch`](Filter::Patch), usually an enum
/// with one variant per field, so an unknown field is a compile error rather
/// than a silently ignored key.
pub trait Filter: Clone + Debug + PartialEq + Send + Sync + 'static {
    type Patch: Debug + Send + 'static;

    fn merge(&mut self, patch: Self::Patch);
}

impl Filter for () {
    type Patch = ();

    fn merge(&mut self, _patch: ()) {}
}

/// Child-list filter keyed on the selected parent record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub parent: Option<RecordKey>,
}

impl Filter for ScopeFilter {
    type Patch = Option<RecordKey>;

    fn merge(&mut self, patch: Option<RecordKey>) {
        self.parent = patch;
    }
}

/// One-based page position and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Paging {
    page_index: u32,
    page_size: u32,
}

impl Paging {
    /// Validated constructor: `page_index >= 1`, `page_size > 0`.
    pub fn new(page_index: u32, page_size: u32) -> Result<Self> {
        if page_index == 0 || page_size == 0 {
            return Err(EngineError::InvalidPaging {
                page_index,
                page_size,
            });
        }
        Ok(Self {
            page_index,
            page_size,
        })
    }

    /// First page of the given size; a zero size is bumped to one.
    pub fn first(page_size: u32) -> Self {
        Self {
            page_index: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Zero-based offset of the first record on this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_index - 1) * u64::from(self.page_size)
    }

    /// Number of pages needed to show `record_count` records.
    pub fn page_count(&self, record_count: u64) -> u64 {
        record_count.div_ceil(u64::from(self.page_size))
    }

    fn rewound(self) -> Self {
        Self {
            page_index: 1,
            ..self
        }
    }
}

/// What page of what filtered data is wanted.
///
/// Immutable: every change produces a new value. Changing the keyword or the
/// filter always rewinds to page one.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<F> {
    keyword: String,
    filter: F,
    paging: Paging,
}

impl<F: Filter> QueryState<F> {
    pub fn new(filter: F, page_size: u32) -> Self {
        Self {
            keyword: String::new(),
            filter,
            paging: Paging::first(page_size),
        }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn paging(&self) -> Paging {
        self.paging
    }

    #[must_use]
    pub fn with_filter_patch(&self, patch: F::Patch) -> Self {
        let mut filter = self.filter.clone();
        filter.merge(patch);
        Self {
            keyword: self.keyword.clone(),
            filter,
            paging: self.paging.rewound(),
        }
    }

    #[must_use]
    pub fn with_keyword(&self, keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            filter: self.filter.clone(),
            paging: self.paging.rewound(),
        }
    }

    #[must_use]
    pub fn with_paging(&self, paging: Paging) -> Self {
        Self {
            keyword: self.keyword.clone(),
            filter: self.filter.clone(),
            paging,
        }
    }
}
