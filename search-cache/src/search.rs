use crate::cache::{CacheConfig, CacheKey, CacheStats, CacheStore};
use crate::debounce::Debouncer;
use crate::fetcher::{FetchRequest, SearchFetcher};
use crate::state::{RequestState, RequestStatus};
use crate::{Error, FetchError};
use futures::FutureExt;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Mutable bookkeeping of one search instance
struct Inner {
    filters: Value,
    /// Latest query handed to `update`, possibly still debouncing
    search_query: String,
    /// Query the current key was built from
    applied_query: String,
    current_key: Option<CacheKey>,
    latest_request: u64,
    mounted: bool,
}

struct Shared<T> {
    store: CacheStore<T>,
    fetcher: Box<dyn SearchFetcher<T>>,
    debouncer: Debouncer,
    state: watch::Sender<RequestState<T>>,
    inner: Mutex<Inner>,
}

/// A search result cache owned by a single consumer.
///
/// The first fetch is issued as soon as the instance is created. Filter
/// changes apply right away, query changes are debounced, and keys that are
/// already cached are answered without calling the fetcher. Only the most
/// recently issued request may change the visible state; anything that
/// resolves later for a superseded key is dropped.
///
/// Instances share nothing with each other. Dropping one (or calling
/// [`CachedSearch::shutdown`]) cancels a pending debounce and makes in-flight
/// fetches discard their results.
///
/// Must be created inside a Tokio runtime.
pub struct CachedSearch<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + Sync + 'static> CachedSearch<T> {
    pub fn new<F, S>(
        config: CacheConfig,
        filters: &F,
        search_query: S,
        fetcher: impl SearchFetcher<T>,
    ) -> Result<Self, Error>
    where
        F: Serialize + ?Sized,
        S: Into<String>,
    {
        config.validate()?;
        let delay = config.debounce_delay()?;
        let filters = serde_json::to_value(filters)?;
        let search_query = search_query.into();
        let key = CacheKey::from_value(&filters, &search_query)?;

        let (state, _) = watch::channel(RequestState::default());
        let shared = Arc::new(Shared {
            store: CacheStore::new(config),
            fetcher: Box::new(fetcher),
            debouncer: Debouncer::new(delay),
            state,
            inner: Mutex::new(Inner {
                filters,
                search_query: search_query.clone(),
                applied_query: search_query,
                current_key: None,
                latest_request: 0,
                mounted: true,
            }),
        });

        {
            let mut inner = shared.lock_inner();
            debug!("Mounting cached search with key: {}", key);
            shared.apply_key(&mut inner, key);
        }

        Ok(Self { shared })
    }

    /// Feed new filters and query, as a re-render with new props would.
    ///
    /// Changed filters switch the key immediately. A change of only the query
    /// waits for the debounce window.
    pub fn update<F, S>(&self, filters: &F, search_query: S) -> Result<(), Error>
    where
        F: Serialize + ?Sized,
        S: Into<String>,
    {
        let filters = serde_json::to_value(filters)?;
        let search_query = search_query.into();
        let shared = &self.shared;

        let mut inner = shared.lock_inner();
        if !inner.mounted {
            return Ok(());
        }

        if filters != inner.filters {
            let key = CacheKey::from_value(&filters, &search_query)?;
            shared.debouncer.cancel();
            inner.filters = filters;
            inner.search_query = search_query.clone();
            inner.applied_query = search_query;
            shared.apply_key(&mut inner, key);
            return Ok(());
        }

        if search_query == inner.search_query {
            return Ok(());
        }
        inner.search_query = search_query.clone();

        if search_query == inner.applied_query {
            shared.debouncer.cancel();
            return Ok(());
        }

        let key = CacheKey::from_value(&inner.filters, &search_query)?;
        let weak = Arc::downgrade(shared);
        shared.debouncer.schedule(move |ticket| async move {
            if let Some(shared) = Weak::upgrade(&weak) {
                shared.apply_debounced(ticket, key, search_query);
            }
        });
        Ok(())
    }

    /// Fetch the current key again, ignoring any cached entry.
    ///
    /// Resolves once the fetch has settled. Failures end up in [`Self::error`].
    pub async fn refetch(&self) {
        let handle = {
            let mut inner = self.shared.lock_inner();
            let key = match (&inner.current_key, inner.mounted) {
                (Some(key), true) => key.clone(),
                _ => return,
            };
            debug!("Manual refetch for key: {}", key);
            self.shared.issue_fetch(&mut inner, key)
        };

        if let Err(err) = handle.await {
            warn!("Refetch task did not complete: {}", err);
        }
    }

    /// Drop every cached entry of this instance. The visible data stays.
    pub fn clear_cache(&self) {
        self.shared.store.clear();
    }

    /// Replace the data of the current key, both cached and visible
    pub fn update_cache_data(&self, data: T) {
        let inner = self.shared.lock_inner();
        if let Some(key) = &inner.current_key {
            self.shared.store.insert(key.clone(), data.clone());
        }
        self.shared.state.send_modify(|state| state.data = Some(data));
    }

    /// Stop the instance: pending debounces are cancelled and results of
    /// in-flight fetches are ignored from now on
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn data(&self) -> Option<T> {
        self.shared.state.borrow().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.state.borrow().is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.shared.state.borrow().error.clone()
    }

    pub fn status(&self) -> RequestStatus {
        self.shared.state.borrow().status
    }

    pub fn state(&self) -> RequestState<T> {
        self.shared.state.borrow().clone()
    }

    /// Whether the current key has a valid cached entry
    pub fn has_cache(&self) -> bool {
        let inner = self.shared.lock_inner();
        inner
            .current_key
            .as_ref()
            .is_some_and(|key| self.shared.store.contains(key))
    }

    /// Receiver that is notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<RequestState<T>> {
        self.shared.state.subscribe()
    }

    pub fn current_key(&self) -> Option<CacheKey> {
        self.shared.lock_inner().current_key.clone()
    }

    /// Whether a query change is waiting for its debounce window
    pub fn is_debouncing(&self) -> bool {
        self.shared.debouncer.is_pending()
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.store.stats()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.store.config
    }
}

impl<T> Drop for CachedSearch<T> {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl<T> Shared<T> {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shutdown(&self) {
        let mut inner = self.lock_inner();
        if inner.mounted {
            debug!("Shutting down cached search");
            inner.mounted = false;
            self.debouncer.cancel();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    /// Make `key` current, answering from cache when possible
    fn apply_key(self: &Arc<Self>, inner: &mut Inner, key: CacheKey) {
        if inner.current_key.as_ref() == Some(&key) {
            return;
        }
        inner.current_key = Some(key.clone());

        if let Some(entry) = self.store.get(&key) {
            // Supersede whatever is still in flight for the previous key
            inner.latest_request += 1;
            self.state.send_modify(|state| state.succeed(entry.into_data()));
            return;
        }

        self.issue_fetch(inner, key);
    }

    fn apply_debounced(self: &Arc<Self>, ticket: u64, key: CacheKey, search_query: String) {
        let mut inner = self.lock_inner();
        if !inner.mounted || !self.debouncer.is_current(ticket) {
            debug!("Dropping debounced query for key: {}", key);
            return;
        }
        inner.applied_query = search_query;
        self.apply_key(&mut inner, key);
    }

    fn issue_fetch(self: &Arc<Self>, inner: &mut Inner, key: CacheKey) -> JoinHandle<()> {
        inner.latest_request += 1;
        let request_id = inner.latest_request;
        let request = FetchRequest::new(
            key.clone(),
            inner.filters.clone(),
            inner.applied_query.clone(),
        );
        self.state.send_modify(|state| state.start_loading());
        debug!("Issuing request {} for key: {}", request_id, key);

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(shared.fetcher.fetch(request))
                .catch_unwind()
                .await;
            match outcome {
                Ok(outcome) => shared.settle(request_id, key, outcome),
                Err(_) => {
                    warn!("Fetcher panicked for key: {}", key);
                    shared.settle(request_id, key, Err(FetchError::from("fetcher panicked")));
                }
            }
        })
    }

    fn settle(&self, request_id: u64, key: CacheKey, outcome: Result<T, FetchError>) {
        let inner = self.lock_inner();
        if !inner.mounted || inner.latest_request != request_id {
            debug!("Discarding stale result of request {} for key: {}", request_id, key);
            return;
        }

        match outcome {
            Ok(data) => {
                self.store.insert(key, data.clone());
                self.state.send_modify(|state| state.succeed(data));
            }
            Err(err) => {
                debug!("Request {} failed for key {}: {}", request_id, key, err);
                self.state.send_modify(|state| state.fail(err.to_string()));
            }
        }
    }
}
