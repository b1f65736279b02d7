//! Remote list engine.
//!
//! A [`ListEngine`] owns the query, the last fetched page and the selection of
//! one remote list. Every query change dispatches a fetch through the list's
//! [`FetchCache`]: identical in-flight requests coalesce, newer ones supersede,
//! and a response is committed only if it still belongs to the current query.
//! The previous page stays visible while a fetch is running or after it fails.

use crate::engine::EngineContext;
use crate::engine::cache::{Admission, FetchCache};
use crate::engine::polling::{PollConfig, Pollable, PollingScheduler};
use crate::engine::ticket::Ticket;
use crate::error::{RemoteError, Result};
use crate::metrics::Metrics;
use crate::models::{
    FetchOutcome, FetchState, Filter, ListSnapshot, Page, Paging, QueryState, Record, RecordKey,
};
use crate::services::Fetcher;
use crate::state::{StateManager, TrackChanges, lock};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::Instrument;

/// Options of a single [`ListEngine::fetch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Issue a new request even if an identical one is in flight.
    pub no_cache: bool,
}

impl FetchOptions {
    pub fn no_cache() -> Self {
        Self { no_cache: true }
    }
}

/// Everything a list engine owns.
#[derive(Debug, Clone, PartialEq)]
pub struct ListState<T, F> {
    pub query: QueryState<F>,
    pub list: ListSnapshot<T>,
    pub selection: Option<T>,
}

impl<T, F> ListState<T, F> {
    pub fn new(query: QueryState<F>) -> Self {
        Self {
            query,
            list: ListSnapshot::default(),
            selection: None,
        }
    }
}

/// Change events broadcast by a [`ListEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange {
    QueryChanged,
    FetchStateChanged { from: FetchState, to: FetchState },
    DataChanged { record_count: u64 },
    ErrorChanged(Option<RemoteError>),
    SelectionChanged(Option<RecordKey>),
    /// The engine was cleared back to its initial state.
    Reset,
    /// A superseded response was dropped.
    StaleDiscarded { generation: u64 },
}

impl<T: Record, F: Filter> TrackChanges for ListState<T, F> {
    type Change = ListChange;

    fn detect_changes(old: &Self, new: &Self) -> Vec<ListChange> {
        let mut changes = Vec::new();

        if old.query != new.query {
            changes.push(ListChange::QueryChanged);
        }
        if old.list.fetch_state != new.list.fetch_state {
            changes.push(ListChange::FetchStateChanged {
                from: old.list.fetch_state,
                to: new.list.fetch_state,
            });
        }
        if old.list.data != new.list.data {
            changes.push(ListChange::DataChanged {
                record_count: new.list.data.record_count,
            });
        }
        if old.list.error != new.list.error {
            changes.push(ListChange::ErrorChanged(new.list.error.clone()));
        }
        if old.selection != new.selection {
            changes.push(ListChange::SelectionChanged(
                new.selection.as_ref().map(|record| record.key()),
            ));
        }

        changes
    }
}

type FinishHook<T, F> = Arc<dyn Fn(&ListEngine<T, F>, &FetchOutcome) + Send + Sync>;
type SelectHook<T, F> = Arc<dyn Fn(&ListEngine<T, F>, Option<&T>) + Send + Sync>;

struct ListHooks<T: Record, F: Filter> {
    finish: Vec<FinishHook<T, F>>,
    select: Vec<SelectHook<T, F>>,
}

impl<T: Record, F: Filter> Default for ListHooks<T, F> {
    fn default() -> Self {
        Self {
            finish: Vec::new(),
            select: Vec::new(),
        }
    }
}

struct ListInner<T: Record, F: Filter> {
    name: String,
    state: StateManager<ListState<T, F>>,
    cache: Mutex<FetchCache<F>>,
    fetcher: Arc<dyn Fetcher<T, F>>,
    initial_query: QueryState<F>,
    poller: PollingScheduler,
    poll_delay: Duration,
    hooks: Mutex<ListHooks<T, F>>,
    metrics: Arc<Metrics>,
}

/// Query, fetch, selection and polling for one remote list.
///
/// Cheap to clone; clones share the same state. Methods that fetch spawn on
/// the current tokio runtime.
pub struct ListEngine<T: Record, F: Filter> {
    inner: Arc<ListInner<T, F>>,
}

impl<T: Record, F: Filter> Clone for ListEngine<T, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Record, F: Filter> fmt::Debug for ListEngine<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListEngine")
            .field("name", &self.inner.name)
            .field("query", &self.query())
            .finish_non_exhaustive()
    }
}

impl<T: Record, F: Filter> ListEngine<T, F> {
    /// A list starting on page one with the configured default page size.
    pub fn new(
        ctx: &EngineContext,
        name: impl Into<String>,
        filter: F,
        fetcher: impl Fetcher<T, F> + 'static,
    ) -> Self {
        let query = QueryState::new(filter, ctx.config.default_page_size);
        Self::with_query(ctx, name, query, fetcher)
    }

    /// A list starting from an explicit query. [`clear`](Self::clear) returns to it.
    pub fn with_query(
        ctx: &EngineContext,
        name: impl Into<String>,
        query: QueryState<F>,
        fetcher: impl Fetcher<T, F> + 'static,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(ListInner {
                state: StateManager::new(ListState::new(query.clone()), ctx.config.event_capacity),
                cache: Mutex::new(FetchCache::default()),
                fetcher: Arc::new(fetcher),
                initial_query: query,
                poller: PollingScheduler::new(name.clone(), Arc::clone(&ctx.metrics)),
                poll_delay: ctx.config.poll_delay(),
                hooks: Mutex::new(ListHooks::default()),
                metrics: Arc::clone(&ctx.metrics),
                name,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Fetch the current query.
    pub fn fetch(&self, options: FetchOptions) -> Ticket<FetchOutcome> {
        let query = self.query();
        self.dispatch(query, options.no_cache)
    }

    /// Merge `patch` into the filter, rewind to page one and re-fetch.
    pub fn apply_filter(&self, patch: F::Patch) -> Ticket<FetchOutcome> {
        let query = self.set_query(|query| query.with_filter_patch(patch));
        self.dispatch(query, false)
    }

    /// Replace the keyword, rewind to page one and re-fetch.
    pub fn change_keyword(&self, keyword: impl Into<String>) -> Ticket<FetchOutcome> {
        let keyword = keyword.into();
        let query = self.set_query(|query| query.with_keyword(keyword));
        self.dispatch(query, false)
    }

    /// Like [`change_keyword`](Self::change_keyword) with surrounding whitespace trimmed.
    pub fn perform_search(&self, keyword: &str) -> Ticket<FetchOutcome> {
        self.change_keyword(keyword.trim())
    }

    /// Move to another page (or page size) without touching the criteria.
    pub fn change_paging(&self, paging: Paging) -> Ticket<FetchOutcome> {
        let query = self.set_query(|query| query.with_paging(paging));
        self.dispatch(query, false)
    }

    /// Set the selection. No network effect.
    ///
    /// A record missing from the current page is accepted (externally resolved
    /// defaults rely on it) but logged.
    pub fn select(&self, record: Option<T>) {
        if let Some(record) = &record {
            let key = record.key();
            if !self.inner.state.read(|state| state.list.contains(&key)) {
                tracing::warn!(list = %self.inner.name, %key, "selected record is not on the current page");
            }
        }

        self.inner
            .state
            .update(|state| state.selection = record.clone());

        let hooks = lock(&self.inner.hooks).select.clone();
        for hook in hooks {
            hook(self, record.as_ref());
        }
    }

    /// Select the record with `key` from the current page. False if absent.
    pub fn select_key(&self, key: &RecordKey) -> bool {
        match self.inner.state.read(|state| state.list.find(key).cloned()) {
            Some(record) => {
                self.select(Some(record));
                true
            }
            None => false,
        }
    }

    /// Stop polling, orphan any in-flight fetch and return to the initial state.
    pub fn clear(&self) {
        self.inner.poller.clear();
        lock(&self.inner.cache).invalidate();

        let had_selection = self.inner.state.read(|state| state.selection.is_some());
        self.inner
            .state
            .replace(ListState::new(self.inner.initial_query.clone()));
        self.inner.state.emit(ListChange::Reset);
        tracing::debug!(list = %self.inner.name, "list cleared");

        if had_selection {
            let hooks = lock(&self.inner.hooks).select.clone();
            for hook in hooks {
                hook(self, None);
            }
        }
    }

    /// Fetch now, then keep re-fetching every `config.delay()` while the
    /// predicate holds for the latest snapshot. Replaces any active loop.
    pub fn polling(&self, config: PollConfig<ListSnapshot<T>>) {
        self.inner.poller.arm(&self.inner, config);
    }

    /// [`polling`](Self::polling) with the configured default delay.
    pub fn poll_while<P>(&self, should_continue: P) -> Result<()>
    where
        P: Fn(&ListSnapshot<T>) -> bool + Send + Sync + 'static,
    {
        let config = PollConfig::new(self.inner.poll_delay, should_continue)?;
        self.polling(config);
        Ok(())
    }

    /// Cancel the poll loop, if any. Idempotent.
    pub fn clear_polling(&self) {
        self.inner.poller.clear();
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poller.is_polling()
    }

    pub fn active_timers(&self) -> usize {
        self.inner.poller.active_timers()
    }

    pub fn snapshot(&self) -> ListSnapshot<T> {
        self.inner.state.read(|state| state.list.clone())
    }

    pub fn state(&self) -> ListState<T, F> {
        self.inner.state.snapshot()
    }

    pub fn query(&self) -> QueryState<F> {
        self.inner.state.read(|state| state.query.clone())
    }

    pub fn selection(&self) -> Option<T> {
        self.inner.state.read(|state| state.selection.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListChange> {
        self.inner.state.subscribe()
    }

    /// Run `hook` whenever a fetch result (page or error) is committed.
    pub fn on_finish<H>(&self, hook: H)
    where
        H: Fn(&ListEngine<T, F>, &FetchOutcome) + Send + Sync + 'static,
    {
        lock(&self.inner.hooks).finish.push(Arc::new(hook));
    }

    /// Run `hook` after every [`select`](Self::select), and when a clear drops the selection.
    pub fn on_select<H>(&self, hook: H)
    where
        H: Fn(&ListEngine<T, F>, Option<&T>) + Send + Sync + 'static,
    {
        lock(&self.inner.hooks).select.push(Arc::new(hook));
    }

    pub fn downgrade(&self) -> WeakListEngine<T, F> {
        WeakListEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn set_query(&self, change: impl FnOnce(&QueryState<F>) -> QueryState<F>) -> QueryState<F> {
        self.inner
            .state
            .update_with(|state| {
                state.query = change(&state.query);
                state.query.clone()
            })
            .0
    }

    fn dispatch(&self, query: QueryState<F>, no_cache: bool) -> Ticket<FetchOutcome> {
        let admission = lock(&self.inner.cache).admit(&query, no_cache);
        let (generation, completer, ticket) = match admission {
            Admission::Coalesced(ticket) => {
                tracing::debug!(list = %self.inner.name, "fetch coalesced into in-flight request");
                self.inner.metrics.record_fetch_coalesced();
                return ticket;
            }
            Admission::Issue {
                generation,
                completer,
                ticket,
            } => (generation, completer, ticket),
        };

        self.inner.metrics.record_fetch_issued();
        self.inner
            .state
            .update(|state| state.list.fetch_state = FetchState::Fetching);

        let weak = Arc::downgrade(&self.inner);
        let fetcher = Arc::clone(&self.inner.fetcher);
        let span = tracing::debug_span!("fetch", list = %self.inner.name, generation);

        tokio::spawn(
            async move {
                let request = query.clone();
                let call = tokio::spawn(
                    async move { fetcher.fetch(request).await }.in_current_span(),
                );
                let result = match call.await {
                    Ok(result) => result,
                    Err(join_error) => {
                        tracing::error!(%join_error, "fetch task aborted");
                        Err(RemoteError::transport(join_error.to_string()))
                    }
                };
                let outcome = match weak.upgrade() {
                    Some(inner) => ListEngine { inner }.commit(generation, &query, result),
                    None => FetchOutcome::Stale,
                };
                completer.complete(outcome);
            }
            .instrument(span),
        );

        ticket
    }

    fn commit(
        &self,
        generation: u64,
        query: &QueryState<F>,
        result: std::result::Result<Page<T>, RemoteError>,
    ) -> FetchOutcome {
        if !lock(&self.inner.cache).settle(generation) {
            return self.discard(generation);
        }

        let (outcome, _) = self.inner.state.update_with(|state| {
            if state.query != *query {
                return None;
            }
            state.list.fetched = true;
            Some(match result {
                Ok(page) => {
                    state.list.fetch_state = FetchState::Ready;
                    state.list.data = page;
                    state.list.error = None;
                    FetchOutcome::Ready
                }
                Err(error) => {
                    state.list.fetch_state = FetchState::Failed;
                    state.list.error = Some(error.clone());
                    FetchOutcome::Failed(error)
                }
            })
        });

        let Some(outcome) = outcome else {
            return self.discard(generation);
        };

        if let FetchOutcome::Failed(error) = &outcome {
            tracing::warn!(list = %self.inner.name, %error, "fetch failed, keeping previous page");
            self.inner.metrics.record_fetch_failed();
        }

        let hooks = lock(&self.inner.hooks).finish.clone();
        for hook in hooks {
            hook(self, &outcome);
        }

        outcome
    }

    fn discard(&self, generation: u64) -> FetchOutcome {
        tracing::debug!(list = %self.inner.name, generation, "discarding stale response");
        self.inner.metrics.record_stale_discarded();
        self.inner
            .state
            .emit(ListChange::StaleDiscarded { generation });
        FetchOutcome::Stale
    }
}

impl<T: Record, F: Filter> Pollable for ListInner<T, F> {
    type Snapshot = ListSnapshot<T>;

    fn begin_poll(this: &Arc<Self>) -> Ticket<FetchOutcome> {
        ListEngine {
            inner: Arc::clone(this),
        }
        .fetch(FetchOptions::default())
    }

    fn poll_snapshot(&self) -> ListSnapshot<T> {
        self.state.read(|state| state.list.clone())
    }
}

/// Non-owning handle to a [`ListEngine`], for hooks that must not keep it alive.
pub struct WeakListEngine<T: Record, F: Filter> {
    inner: Weak<ListInner<T, F>>,
}

impl<T: Record, F: Filter> WeakListEngine<T, F> {
    pub fn upgrade(&self) -> Option<ListEngine<T, F>> {
        self.inner.upgrade().map(|inner| ListEngine { inner })
    }
}

impl<T: Record, F: Filter> Clone for WeakListEngine<T, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: Record, F: Filter> fmt::Debug for WeakListEngine<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakListEngine").finish_non_exhaustive()
    }
}
