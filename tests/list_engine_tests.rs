//! Integration tests for ListEngine, polling and cascades
//!
//! These tests verify:
//! - Out-of-order responses never regress the visible page
//! - Criteria changes always land on page one
//! - Polling stops once the predicate settles, and clears cleanly
//! - Three-level cascades follow sticky selections
//! - Change events and metrics track fetch activity

use console_engine::engine::{ListChange, resolve_default_selection};
use console_engine::models::ScopeFilter;
use console_engine::services::SessionSelections;
use console_engine::{
    CascadeResolver, EngineContext, FetchOptions, FetchOutcome, FetchState, Identify, ListEngine,
    Page, Paging, PollConfig, QueryState, RecordKey, RemoteError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, sleep, timeout};

#[derive(Debug, Clone, PartialEq)]
struct Pod {
    name: String,
    phase: String,
}

impl Identify for Pod {
    fn key(&self) -> RecordKey {
        RecordKey::from(self.name.as_str())
    }
}

fn pod(name: &str, phase: &str) -> Pod {
    Pod {
        name: name.to_string(),
        phase: phase.to_string(),
    }
}

/// Responds after a delay that depends on the keyword, so later queries can
/// finish first.
fn delayed_pods(ctx: &EngineContext) -> ListEngine<Pod, ()> {
    ListEngine::new(ctx, "pods", (), |query: QueryState<()>| async move {
        let keyword = query.keyword().to_string();
        let delay = if keyword == "slow" { 500 } else { 50 };
        sleep(Duration::from_millis(delay)).await;
        Ok::<_, RemoteError>(Page::complete(vec![pod(&keyword, "Running")]))
    })
}

#[tokio::test(start_paused = true)]
async fn test_slow_response_for_old_query_is_discarded() {
    let ctx = EngineContext::default();
    let pods = delayed_pods(&ctx);

    let slow = pods.change_keyword("slow");
    let fast = pods.change_keyword("fast");

    assert_eq!(fast.settled().await, Some(FetchOutcome::Ready));
    assert_eq!(slow.settled().await, Some(FetchOutcome::Stale));

    let snapshot = pods.snapshot();
    assert_eq!(snapshot.records(), &[pod("fast", "Running")]);
    assert_eq!(snapshot.fetch_state, FetchState::Ready);
    assert_eq!(ctx.metrics.stale_discarded.load(Ordering::Relaxed), 1);
    assert_eq!(ctx.metrics.fetches_issued.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_cache_fetch_supersedes_identical_request() {
    let ctx = EngineContext::default();
    let pods = delayed_pods(&ctx);

    let first = pods.fetch(FetchOptions::default());
    let coalesced = pods.fetch(FetchOptions::default());
    let forced = pods.fetch(FetchOptions::no_cache());

    assert_eq!(forced.settled().await, Some(FetchOutcome::Ready));
    assert_eq!(first.settled().await, Some(FetchOutcome::Stale));
    assert_eq!(coalesced.settled().await, Some(FetchOutcome::Stale));
    assert_eq!(ctx.metrics.fetches_coalesced.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_criteria_changes_rewind_before_fetch_resolves() {
    let ctx = EngineContext::default();
    let pods = delayed_pods(&ctx);

    let _ = pods.change_paging(Paging::new(4, 10).unwrap());
    assert_eq!(pods.query().paging().page_index(), 4);

    let _ = pods.perform_search("nginx");
    assert_eq!(pods.query().paging().page_index(), 1);
    assert!(pods.snapshot().is_loading());

    let _ = pods.change_paging(Paging::new(2, 10).unwrap());
    let _ = pods.apply_filter(());
    assert_eq!(pods.query().paging().page_index(), 1);
    assert_eq!(pods.query().keyword(), "nginx");
}

#[tokio::test]
async fn test_change_events_follow_fetch_lifecycle() {
    let ctx = EngineContext::default();
    let pods: ListEngine<Pod, ()> = ListEngine::new(&ctx, "pods", (), |_query: QueryState<()>| async {
        Ok::<_, RemoteError>(Page::new(3, vec![pod("api", "Running")]))
    });
    let mut events = pods.subscribe();

    pods.fetch(FetchOptions::default()).settled().await;

    let mut seen = Vec::new();
    while let Ok(change) = events.try_recv() {
        seen.push(change);
    }
    assert_eq!(
        seen,
        vec![
            ListChange::FetchStateChanged {
                from: FetchState::Pending,
                to: FetchState::Fetching,
            },
            ListChange::FetchStateChanged {
                from: FetchState::Fetching,
                to: FetchState::Ready,
            },
            ListChange::DataChanged { record_count: 3 },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_polling_until_no_transient_phase() {
    let ctx = EngineContext::default();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let pods: ListEngine<Pod, ()> = ListEngine::new(&ctx, "pods", (), move |_query: QueryState<()>| {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            let phase = if call < 3 { "Terminating" } else { "Running" };
            Ok::<_, RemoteError>(Page::complete(vec![pod("web", phase)]))
        }
    });

    let config = PollConfig::new(Duration::from_millis(200), |snapshot: &console_engine::ListSnapshot<Pod>| {
        snapshot.records().iter().any(|p| p.phase == "Terminating")
    })
    .unwrap();
    pods.polling(config);
    assert_eq!(pods.active_timers(), 1);

    sleep(Duration::from_secs(5)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(pods.snapshot().records()[0].phase, "Running");
    assert_eq!(pods.active_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_polling_rearm_and_clear() {
    let ctx = EngineContext::default();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let pods: ListEngine<Pod, ()> = ListEngine::new(&ctx, "pods", (), move |_query: QueryState<()>| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, RemoteError>(Page::complete(vec![pod("job", "Pending")])) }
    });

    pods.poll_while(|_| true).unwrap();
    pods.poll_while(|_| true).unwrap();
    assert_eq!(pods.active_timers(), 1);

    pods.clear_polling();
    assert_eq!(pods.active_timers(), 0);
    pods.clear_polling();

    // Let the already dispatched refresh land before counting
    pods.fetch(FetchOptions::default()).settled().await;
    let settled = calls.load(Ordering::SeqCst);
    assert_eq!(settled, 1);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), settled);
}

#[tokio::test(start_paused = true)]
async fn test_clear_stops_polling() {
    let ctx = EngineContext::default();
    let pods = delayed_pods(&ctx);

    pods.poll_while(|_| true).unwrap();
    pods.clear();

    assert!(!pods.is_polling());
    assert_eq!(pods.snapshot().fetch_state, FetchState::Pending);
}

#[derive(Debug, Clone, PartialEq)]
struct Scoped {
    id: i64,
    parent: Option<i64>,
}

impl Identify for Scoped {
    fn key(&self) -> RecordKey {
        RecordKey::Id(self.id)
    }
}

fn scoped_list(
    ctx: &EngineContext,
    name: &str,
    requests: Arc<Mutex<Vec<String>>>,
) -> ListEngine<Scoped, ScopeFilter> {
    let label = name.to_string();
    ListEngine::new(
        ctx,
        name,
        ScopeFilter::default(),
        move |query: QueryState<ScopeFilter>| {
            let parent = match &query.filter().parent {
                Some(RecordKey::Id(id)) => Some(*id),
                _ => None,
            };
            requests
                .lock()
                .unwrap()
                .push(format!("{label}:{}", parent.unwrap_or(0)));
            async move {
                let base = parent.unwrap_or(0) * 10;
                Ok::<_, RemoteError>(Page::complete(
                    (1..=3)
                        .map(|offset| Scoped {
                            id: base + offset,
                            parent,
                        })
                        .collect::<Vec<_>>(),
                ))
            }
        },
    )
}

#[tokio::test]
async fn test_three_level_cascade_follows_sticky_selections() {
    let ctx = EngineContext::default();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let memory = Arc::new(SessionSelections::new());
    memory.remember("region", 2);
    memory.remember("cluster", 23);

    let regions = scoped_list(&ctx, "region", Arc::clone(&requests));
    let clusters = scoped_list(&ctx, "cluster", Arc::clone(&requests));
    let namespaces = scoped_list(&ctx, "namespace", Arc::clone(&requests));

    let link = |record: &Scoped| Some(record.key());
    let _region_cascade = CascadeResolver::new(&regions, &clusters, memory.clone(), "region", link);
    let _cluster_cascade =
        CascadeResolver::new(&clusters, &namespaces, memory.clone(), "cluster", link);

    regions.fetch(FetchOptions::default()).settled().await;
    let cluster_outcome = timeout(Duration::from_secs(1), clusters.fetch(FetchOptions::default()).settled())
        .await
        .expect("Timeout waiting for clusters");
    assert_eq!(cluster_outcome, Some(FetchOutcome::Ready));
    timeout(Duration::from_secs(1), namespaces.fetch(FetchOptions::default()).settled())
        .await
        .expect("Timeout waiting for namespaces");

    assert_eq!(regions.selection().map(|r| r.id), Some(2));
    assert_eq!(clusters.selection().map(|c| c.id), Some(23));
    let namespace_page = namespaces.snapshot();
    assert_eq!(namespace_page.records()[0].id, 231);
    assert_eq!(namespace_page.records()[0].parent, Some(23));

    let requests = requests.lock().unwrap().clone();
    assert!(requests.contains(&"cluster:2".to_string()));
    assert!(requests.contains(&"namespace:23".to_string()));
}

#[test]
fn test_default_selection_falls_back_to_first_row() {
    let records = vec![pod("a", "Running"), pod("b", "Running")];
    let gone = RecordKey::from("deleted");

    assert_eq!(
        resolve_default_selection(&records, Some(&gone)).map(|p| p.name.as_str()),
        Some("a")
    );
}

#[tokio::test]
async fn test_panicking_fetcher_fails_and_allows_retry() {
    let ctx = EngineContext::default();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let pods: ListEngine<Pod, ()> = ListEngine::new(&ctx, "pods", (), move |_query: QueryState<()>| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if call == 0 {
                panic!("fetcher crashed");
            }
            Ok::<_, RemoteError>(Page::complete(vec![pod("web", "Running")]))
        }
    });

    let first = timeout(Duration::from_secs(1), pods.fetch(FetchOptions::default()).settled())
        .await
        .expect("Timeout waiting for crashed fetch");
    assert!(matches!(first, Some(FetchOutcome::Failed(ref e)) if e.is_transport()));
    assert_eq!(pods.snapshot().fetch_state, FetchState::Failed);
    assert_eq!(ctx.metrics.fetches_failed.load(Ordering::Relaxed), 1);

    let second = pods.fetch(FetchOptions::default()).settled().await;
    assert_eq!(second, Some(FetchOutcome::Ready));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(pods.snapshot().records(), &[pod("web", "Running")]);
}
