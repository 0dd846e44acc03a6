pub mod cache;
pub mod debounce;
mod error;
mod fetcher;
mod search;
mod state;


pub use cache::{CacheConfig, CacheEntry, CacheKey, CacheStats, CacheStore};
pub use debounce::Debouncer;
pub use error::{Error, FetchError};
pub use fetcher::{FetchRequest, SearchFetcher};
pub use search::CachedSearch;
pub use state::{RequestState, RequestStatus};

// Re-export async_trait for hand-written fetchers
pub use async_trait::async_trait;
