//! Integration tests for WorkflowEngine
//!
//! These tests verify:
//! - The Pending → Started → Performing → Done lifecycle and its guards
//! - Partial failure reporting through PerTargetExecutor
//! - After-hooks wiring a list refresh to a finished delete
//! - Cancellation ignoring late executor results
//! - The retry-failed flow through a fresh start/perform cycle

use console_engine::engine::{WorkflowChange, WorkflowOutcome};
use console_engine::models::is_success_workflow;
use console_engine::{
    EngineContext, EngineError, FetchOptions, Identify, ListEngine, OperationExecutor,
    OperationResult, OperationState, Page, PerTargetExecutor, QueryState, RecordKey, RemoteError,
    WorkflowEngine, WorkflowState,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, sleep, timeout};
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Clone, PartialEq)]
struct Release {
    name: String,
}

impl Identify for Release {
    fn key(&self) -> RecordKey {
        RecordKey::from(self.name.as_str())
    }
}

fn release(name: &str) -> Release {
    Release {
        name: name.to_string(),
    }
}

/// Deletes releases from a shared "server", refusing protected ones.
fn delete_executor(
    server: Arc<Mutex<Vec<Release>>>,
    concurrency: usize,
) -> impl OperationExecutor<Release, ()> + 'static {
    PerTargetExecutor::new(
        move |target: Release, _params: ()| {
            let outcome = if target.name.starts_with("protected") {
                Err(RemoteError::server(403, "release is protected"))
            } else {
                server.lock().unwrap().retain(|r| r.name != target.name);
                Ok(())
            };
            std::future::ready(outcome)
        },
        concurrency,
    )
}

#[tokio::test]
async fn test_lifecycle_guards() {
    let ctx = EngineContext::default();
    let server = Arc::new(Mutex::new(vec![release("a")]));
    let workflow: WorkflowEngine<Release, ()> =
        WorkflowEngine::new(&ctx, "delete", delete_executor(server, 2));

    assert_err!(workflow.perform());
    assert_err!(workflow.cancel());
    assert_err!(workflow.reset());

    assert_ok!(workflow.start(vec![release("a")], ()));
    assert_eq!(
        workflow.start(vec![release("b")], ()).unwrap_err(),
        EngineError::InvalidTransition {
            operation: "start",
            state: OperationState::Started,
        }
    );

    let outcome = workflow.perform().unwrap().settled().await.unwrap();
    assert!(outcome.is_success());
    assert_err!(workflow.perform());
    assert_ok!(workflow.reset());
}

#[tokio::test]
async fn test_partial_failure_is_visible_not_retried() {
    let ctx = EngineContext::default();
    let server = Arc::new(Mutex::new(vec![
        release("web"),
        release("protected-db"),
        release("cache"),
    ]));
    let workflow: WorkflowEngine<Release, ()> = WorkflowEngine::new(
        &ctx,
        "delete",
        delete_executor(Arc::clone(&server), ctx.config.executor_concurrency),
    );

    workflow
        .start(vec![release("web"), release("protected-db"), release("cache")], ())
        .unwrap();
    workflow.perform().unwrap().settled().await;

    let state = workflow.state();
    assert_eq!(state.operation_state, OperationState::Done);
    assert_eq!(state.results.len(), state.targets.len());
    assert!(!is_success_workflow(&state));
    assert_eq!(
        state.check(),
        Err(EngineError::PartialFailure { failed: 1, total: 3 })
    );
    assert_eq!(state.failed_targets(), vec![release("protected-db")]);
    assert_eq!(*server.lock().unwrap(), vec![release("protected-db")]);
    assert_eq!(ctx.metrics.workflows_failed.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_retry_failed_targets_with_fresh_cycle() {
    let ctx = EngineContext::default();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let workflow: WorkflowEngine<u32, ()> = WorkflowEngine::new(
        &ctx,
        "restart",
        move |targets: Vec<u32>, _params: ()| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, RemoteError>(
                    targets
                        .into_iter()
                        .map(|id| {
                            if id % 2 == 0 && attempt == 0 {
                                OperationResult::failed(id, RemoteError::transport("timeout"))
                            } else {
                                OperationResult::succeeded(id)
                            }
                        })
                        .collect::<Vec<_>>(),
                )
            }
        },
    );

    workflow.start(vec![1, 2, 3, 4], ()).unwrap();
    workflow.perform().unwrap().settled().await;
    let retry = workflow.state().failed_targets();
    assert_eq!(retry, vec![2, 4]);

    workflow.reset().unwrap();
    workflow.start(retry, ()).unwrap();
    let outcome = workflow.perform().unwrap().settled().await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.results().len(), 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_done_hook_refreshes_list_and_resets() {
    let ctx = EngineContext::default();
    let server = Arc::new(Mutex::new(vec![release("web"), release("worker")]));

    let listing = Arc::clone(&server);
    let releases: ListEngine<Release, ()> =
        ListEngine::new(&ctx, "releases", (), move |_query: QueryState<()>| {
            let records = listing.lock().unwrap().clone();
            async move { Ok::<_, RemoteError>(Page::complete(records)) }
        });
    releases.fetch(FetchOptions::default()).settled().await;
    assert_eq!(releases.snapshot().records().len(), 2);

    let workflow: WorkflowEngine<Release, ()> =
        WorkflowEngine::new(&ctx, "delete", delete_executor(Arc::clone(&server), 2));
    let list = releases.clone();
    workflow.on_done(move |engine, state: &WorkflowState<Release, ()>| {
        if state.is_success() {
            let _ = list.fetch(FetchOptions::no_cache());
        }
        engine.reset().unwrap();
    });

    workflow.start(vec![release("worker")], ()).unwrap();
    workflow.perform().unwrap().settled().await;
    releases.fetch(FetchOptions::default()).settled().await;

    assert_eq!(workflow.operation_state(), OperationState::Pending);
    assert_eq!(releases.snapshot().records(), &[release("web")]);
}

#[tokio::test]
async fn test_after_hooks_fire_once_per_transition() {
    let ctx = EngineContext::default();
    let workflow: WorkflowEngine<u32, ()> = WorkflowEngine::new(
        &ctx,
        "scale",
        |targets: Vec<u32>, _params: ()| async move {
            Ok::<_, RemoteError>(targets.into_iter().map(OperationResult::succeeded).collect::<Vec<_>>())
        },
    );

    let transitions = Arc::new(Mutex::new(Vec::new()));
    for trigger in [
        OperationState::Started,
        OperationState::Performing,
        OperationState::Done,
        OperationState::Pending,
    ] {
        let log = Arc::clone(&transitions);
        workflow.after(trigger, move |_, state| {
            log.lock().unwrap().push(state.operation_state);
        });
    }

    workflow.start(vec![1], ()).unwrap();
    workflow.perform().unwrap().settled().await;
    workflow.reset().unwrap();

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![
            OperationState::Started,
            OperationState::Performing,
            OperationState::Done,
            OperationState::Pending,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_flight() {
    let ctx = EngineContext::default();
    let workflow: WorkflowEngine<u32, ()> = WorkflowEngine::new(
        &ctx,
        "drain",
        |targets: Vec<u32>, _params: ()| async move {
            sleep(Duration::from_secs(10)).await;
            Ok::<_, RemoteError>(targets.into_iter().map(OperationResult::succeeded).collect::<Vec<_>>())
        },
    );
    let mut events = workflow.subscribe();

    workflow.start(vec![1, 2], ()).unwrap();
    let ticket = workflow.perform().unwrap();
    workflow.cancel().unwrap();

    let outcome = timeout(Duration::from_secs(1), ticket.settled())
        .await
        .expect("Timeout waiting for cancelled ticket");
    assert_eq!(outcome, Some(WorkflowOutcome::Cancelled));

    sleep(Duration::from_secs(20)).await;
    let state = workflow.state();
    assert_eq!(state.operation_state, OperationState::Pending);
    assert!(state.results.is_empty());
    assert_eq!(ctx.metrics.workflows_cancelled.load(Ordering::Relaxed), 1);
    assert_eq!(ctx.metrics.workflows_completed.load(Ordering::Relaxed), 0);

    let mut states = HashSet::new();
    while let Ok(change) = events.try_recv() {
        if let WorkflowChange::StateChanged { to, .. } = change {
            states.insert(to);
        }
    }
    assert!(!states.contains(&OperationState::Done));
}

#[tokio::test]
async fn test_panicking_executor_settles_done_with_failures() {
    let ctx = EngineContext::default();
    let workflow: WorkflowEngine<u32, ()> = WorkflowEngine::new(
        &ctx,
        "scale",
        |targets: Vec<u32>, _params: ()| async move {
            if targets.contains(&13) {
                panic!("executor crashed");
            }
            Ok::<_, RemoteError>(targets.into_iter().map(OperationResult::succeeded).collect::<Vec<_>>())
        },
    );

    workflow.start(vec![13, 14], ()).unwrap();
    let outcome = timeout(Duration::from_secs(1), workflow.perform().unwrap().settled())
        .await
        .expect("Timeout waiting for crashed executor")
        .unwrap();

    assert!(!outcome.is_success());
    assert_eq!(outcome.results().len(), 2);
    let state = workflow.state();
    assert_eq!(state.operation_state, OperationState::Done);
    assert!(state.error.as_ref().is_some_and(RemoteError::is_transport));
    assert_eq!(state.failed_targets(), vec![13, 14]);

    workflow.reset().unwrap();
    workflow.start(vec![1], ()).unwrap();
    let retry = workflow.perform().unwrap().settled().await.unwrap();
    assert!(retry.is_success());
}
