use crate::error::RemoteError;
use crate::models::{OperationResult, Payload};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs one multi-target mutation.
///
/// Returns one [`OperationResult`] per target. A failure on one target is a
/// failed result, not an `Err`; `Err` means the whole batch never reached the
/// remote side.
#[async_trait]
pub trait OperationExecutor<T, P>: Send + Sync {
    async fn execute(
        &self,
        targets: Vec<T>,
        params: P,
    ) -> Result<Vec<OperationResult<T>>, RemoteError>;
}

#[async_trait]
impl<T, P, C, Fut> OperationExecutor<T, P> for C
where
    T: Payload,
    P: Payload,
    C: Fn(Vec<T>, P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<OperationResult<T>>, RemoteError>> + Send,
{
    async fn execute(
        &self,
        targets: Vec<T>,
        params: P,
    ) -> Result<Vec<OperationResult<T>>, RemoteError> {
        (self)(targets, params).await
    }
}

/// Adapts a single-target mutation into an [`OperationExecutor`].
///
/// Every target is spawned as its own task; a semaphore caps how many run at
/// once. Results come back in target order, one per target, whatever happens
/// to the individual tasks.
pub struct PerTargetExecutor<C> {
    mutate: Arc<C>,
    concurrency: usize,
}

impl<C> PerTargetExecutor<C> {
    /// `concurrency` of zero is bumped to one.
    pub fn new(mutate: C, concurrency: usize) -> Self {
        Self {
            mutate: Arc::new(mutate),
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl<T, P, C, Fut> OperationExecutor<T, P> for PerTargetExecutor<C>
where
    T: Payload,
    P: Payload,
    C: Fn(T, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RemoteError>> + Send + 'static,
{
    async fn execute(
        &self,
        targets: Vec<T>,
        params: P,
    ) -> Result<Vec<OperationResult<T>>, RemoteError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::with_capacity(targets.len());

        for target in targets {
            let mutate = Arc::clone(&self.mutate);
            let semaphore = Arc::clone(&semaphore);
            let params = params.clone();
            let task_target = target.clone();

            let task = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| RemoteError::transport("executor shut down"))?;
                mutate(task_target, params).await
            });
            tasks.push((target, task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (target, task) in tasks {
            let result = match task.await {
                Ok(Ok(())) => OperationResult::succeeded(target),
                Ok(Err(error)) => {
                    tracing::warn!(?target, %error, "operation failed");
                    OperationResult::failed(target, error)
                }
                Err(join_error) => {
                    tracing::error!(?target, %join_error, "operation task aborted");
                    OperationResult::failed(target, RemoteError::transport(join_error.to_string()))
                }
            };
            results.push(result);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_partial_failure_reports_every_target() {
        let executor = PerTargetExecutor::new(
            |name: &'static str, _params: ()| async move {
                if name == "bob" {
                    Err(RemoteError::server(403, "forbidden"))
                } else {
                    Ok(())
                }
            },
            4,
        );

        let results = executor.execute(vec!["alice", "bob", "carol"], ()).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| (r.target, r.success)).collect::<Vec<_>>(),
            vec![("alice", true), ("bob", false), ("carol", true)]
        );
        assert_eq!(results[1].error, Some(RemoteError::server(403, "forbidden")));
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (running_c, peak_c) = (Arc::clone(&running), Arc::clone(&peak));

        let executor = PerTargetExecutor::new(
            move |_target: u32, _params: ()| {
                let running = Arc::clone(&running_c);
                let peak = Arc::clone(&peak_c);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), RemoteError>(())
                }
            },
            2,
        );

        let results = executor.execute((0..8).collect(), ()).await.unwrap();

        assert!(results.iter().all(|r| r.success));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_closure_executor() {
        let executor = |targets: Vec<u32>, factor: u32| async move {
            Ok::<_, RemoteError>(targets
                .into_iter()
                .map(|t| {
                    if t * factor > 10 {
                        OperationResult::failed(t, RemoteError::server(422, "too large"))
                    } else {
                        OperationResult::succeeded(t)
                    }
                })
                .collect::<Vec<_>>())
        };

        let results = OperationExecutor::execute(&executor, vec![1, 6], 2).await.unwrap();
        assert!(results[0].success);
        assert!(!results[1].success);
    }
}
