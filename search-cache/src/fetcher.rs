use crate::{cache::CacheKey, FetchError};
use async_trait::async_trait;
use futures::Future;
use getset::Getters;
use serde_json::Value;

/// Snapshot of the filters and query a fetch is issued for
#[derive(Debug, Clone, Getters)]
#[get = "pub"]
pub struct FetchRequest {
    key: CacheKey,
    filters: Value,
    search_query: String,
}

impl FetchRequest {
    pub(crate) fn new(key: CacheKey, filters: Value, search_query: String) -> Self {
        Self {
            key,
            filters,
            search_query,
        }
    }
}

/// Data source behind a cached search.
///
/// Closures taking a [`FetchRequest`] and returning a future of `Result<T, E>`
/// implement this trait, so most callers never implement it by hand.
#[async_trait]
pub trait SearchFetcher<T>: Send + Sync + 'static {
    async fn fetch(&self, request: FetchRequest) -> Result<T, FetchError>;
}

#[async_trait]
impl<T, E, F, Fut> SearchFetcher<T> for F
where
    T: Send + 'static,
    E: Into<FetchError> + 'static,
    F: Fn(FetchRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    async fn fetch(&self, request: FetchRequest) -> Result<T, FetchError> {
        (self)(request).await.map_err(Into::into)
    }
}
