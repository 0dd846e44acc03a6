/// Error returned by a [`SearchFetcher`](crate::SearchFetcher).
///
/// Its `Display` output becomes the `error` string of the request state.
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while configuring or driving a cached search
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot derive cache key: {0}")]
    KeyDerivation(#[from] serde_json::Error),
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}
