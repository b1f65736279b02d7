use crate::error::RemoteError;
use crate::models::{Filter, Page, QueryState, Record};
use async_trait::async_trait;
use std::future::Future;

/// Loads one page of records for a query.
///
/// Any `Fn(QueryState<F>) -> impl Future<Output = Result<Page<T>, RemoteError>>`
/// closure is a fetcher.
#[async_trait]
pub trait Fetcher<T, F>: Send + Sync {
    async fn fetch(&self, query: QueryState<F>) -> Result<Page<T>, RemoteError>;
}

#[async_trait]
impl<T, F, C, Fut> Fetcher<T, F> for C
where
    T: Record,
    F: Filter,
    C: Fn(QueryState<F>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Page<T>, RemoteError>> + Send,
{
    async fn fetch(&self, query: QueryState<F>) -> Result<Page<T>, RemoteError> {
        (self)(query).await
    }
}
