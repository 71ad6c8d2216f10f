//! Query Manager Module
//!
//! Shared per-key query state, the in-flight fetch registry used for
//! deduplication, and the retry loop every observer goes through.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheManager, CacheOptions, Clock, SystemClock};
use crate::error::QueryError;
use crate::query::{Query, QueryKey, QueryOptions, QueryState};

/// Values a query can produce. They are cached, so they must serialize.
pub trait QueryData: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> QueryData for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

pub type FetchFuture<T> = BoxFuture<'static, Result<T, QueryError>>;

/// Produces the data for a key. The token is cancelled when the query is
/// invalidated or its last observer goes away.
pub type Fetcher<T> = Arc<dyn Fn(CancellationToken) -> FetchFuture<T> + Send + Sync>;

/// Wraps an async closure as a [`Fetcher`], turning its error into
/// [`QueryError::Fetch`].
pub fn fetcher<T, E, F, Fut>(f: F) -> Fetcher<T>
where
    T: QueryData,
    E: fmt::Display,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Arc::new(move |token| {
        f(token)
            .map(|result| result.map_err(|err| QueryError::Fetch(err.to_string())))
            .boxed()
    })
}

/// Default lifetime of cached query data.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

const QUERY_CACHE_SIZE: usize = 100;

struct InFlight<T> {
    id: u64,
    fetch: Shared<FetchFuture<T>>,
}

struct QueryInner<T> {
    cache: Mutex<CacheManager<T>>,
    clock: Arc<dyn Clock>,
    queries: Mutex<HashMap<String, QueryState<T>>>,
    in_flight: Mutex<HashMap<String, InFlight<T>>>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
    observers: Mutex<HashMap<String, usize>>,
    next_fetch_id: AtomicU64,
}

// == Query Manager ==
/// Cheap to clone; clones share all state.
pub struct QueryManager<T> {
    inner: Arc<QueryInner<T>>,
}

impl<T> Clone for QueryManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: QueryData> QueryManager<T> {
    /// Creates a manager whose cached data lives for `cache_time`.
    pub fn new(cache_time: Duration) -> Self {
        let options = CacheOptions {
            ttl_ms: cache_time.as_millis() as u64,
            max_size: QUERY_CACHE_SIZE,
            prefix: "query".to_string(),
            ..CacheOptions::default()
        };
        Self::with_cache(CacheManager::new(options), Arc::new(SystemClock))
    }

    /// Creates a manager around an existing cache. The clock should be the
    /// same one the cache uses.
    pub fn with_cache(cache: CacheManager<T>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                cache: Mutex::new(cache.with_clock(Arc::clone(&clock))),
                clock,
                queries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                tokens: Mutex::new(HashMap::new()),
                observers: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
            }),
        }
    }

    // == Use Query ==
    /// Mounts an observer for `key`.
    pub fn use_query(
        &self,
        key: impl Into<QueryKey>,
        fetcher: Fetcher<T>,
        options: QueryOptions,
    ) -> Query<T> {
        Query::mount(self.clone(), key.into(), fetcher, options)
    }

    // == Cache Utilities ==
    pub fn get_query_data(&self, key: impl Into<QueryKey>) -> Option<T> {
        self.cached(key.into().as_str())
    }

    /// Overwrites a key's data as if it had just been fetched.
    pub fn set_query_data(&self, key: impl Into<QueryKey>, data: T) {
        self.store_success(key.into().as_str(), data);
    }

    /// Fetches a key outside any observer and caches the result. Failures
    /// are logged and yield `None`.
    pub async fn prefetch(&self, key: impl Into<QueryKey>, fetcher: Fetcher<T>) -> Option<T> {
        let key = key.into();
        let token = self.token_for(key.as_str());
        match guarded(fetcher(token.clone()), token).await {
            Ok(data) => {
                self.store_success(key.as_str(), data.clone());
                Some(data)
            }
            Err(err) => {
                warn!(key = %key, error = %err, "failed to prefetch query");
                None
            }
        }
    }

    /// Drops a key's state, cached data and in-flight fetch, and cancels
    /// its token.
    pub fn invalidate(&self, key: impl Into<QueryKey>) {
        self.invalidate_key(key.into().as_str());
    }

    /// Invalidates every key starting with `prefix`. Returns how many keys
    /// had live state.
    pub fn invalidate_queries(&self, prefix: &str) -> usize {
        let mut keys: HashSet<String> = HashSet::new();
        keys.extend(
            self.inner
                .queries
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned(),
        );
        keys.extend(
            self.inner
                .in_flight
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned(),
        );
        keys.extend(
            self.inner
                .tokens
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned(),
        );

        for key in &keys {
            self.invalidate_key(key);
        }
        self.inner.cache.lock().delete_prefix(prefix);
        keys.len()
    }

    /// Forgets everything and cancels every outstanding fetch.
    pub fn clear(&self) {
        self.inner.queries.lock().clear();
        self.inner.in_flight.lock().clear();
        let tokens: Vec<CancellationToken> =
            self.inner.tokens.lock().drain().map(|(_, t)| t).collect();
        for token in tokens {
            token.cancel();
        }
        self.inner.cache.lock().clear();
    }

    /// Whether a shared fetch is registered for `key`.
    pub fn is_in_flight(&self, key: impl Into<QueryKey>) -> bool {
        self.inner.in_flight.lock().contains_key(key.into().as_str())
    }

    pub fn observer_count(&self, key: impl Into<QueryKey>) -> usize {
        self.inner
            .observers
            .lock()
            .get(key.into().as_str())
            .copied()
            .unwrap_or(0)
    }

    // == Observer Bookkeeping ==
    pub(crate) fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    pub(crate) fn cached(&self, key: &str) -> Option<T> {
        self.inner.cache.lock().get(key)
    }

    pub(crate) fn state(&self, key: &str) -> Option<QueryState<T>> {
        self.inner.queries.lock().get(key).cloned()
    }

    pub(crate) fn update_state<R>(&self, key: &str, f: impl FnOnce(&mut QueryState<T>) -> R) -> R {
        let mut queries = self.inner.queries.lock();
        f(queries.entry(key.to_string()).or_default())
    }

    /// Seeds state for a newly mounted observer from the cache.
    pub(crate) fn seed(&self, key: &str, enabled: bool) {
        if self.inner.queries.lock().contains_key(key) {
            return;
        }
        let cached = self.cached(key);
        self.inner
            .queries
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| QueryState {
                is_loading: enabled && cached.is_none(),
                data: cached,
                ..QueryState::default()
            });
    }

    pub(crate) fn attach(&self, key: &str) {
        *self
            .inner
            .observers
            .lock()
            .entry(key.to_string())
            .or_insert(0) += 1;
    }

    /// Unregisters an observer. The last one out cancels outstanding work
    /// unless it asked to keep its data.
    pub(crate) fn detach(&self, key: &str, keep_previous_data: bool) {
        let remaining = {
            let mut observers = self.inner.observers.lock();
            let count = observers.entry(key.to_string()).or_insert(1);
            *count = count.saturating_sub(1);
            let remaining = *count;
            if remaining == 0 {
                observers.remove(key);
            }
            remaining
        };

        if remaining > 0 || keep_previous_data {
            return;
        }
        let token = self.inner.tokens.lock().remove(key);
        if let Some(token) = token {
            token.cancel();
        }
        self.inner.in_flight.lock().remove(key);
        debug!(key = %key, "last observer detached");
    }

    // == Execute ==
    /// Runs a key's fetcher with deduplication and retries.
    ///
    /// Failed attempts are retried up to `options.retry` times, sleeping
    /// `options.backoff(n)` before retry `n`. A retry joins a fetch that
    /// another caller registered after this caller's last attempt. The
    /// attempt count is per call and mirrored into `retry_count`.
    pub(crate) async fn execute(
        &self,
        key: &str,
        fetcher: &Fetcher<T>,
        options: &QueryOptions,
    ) -> Result<T, QueryError> {
        if !options.enabled {
            return Err(QueryError::Disabled(key.to_string()));
        }
        let token = self.token_for(key);
        let mut attempt: u32 = 0;
        let mut last_id: Option<u64> = None;

        loop {
            self.update_state(key, |state| {
                state.is_fetching = true;
                state.is_loading = state.data.is_none();
                if attempt > 0 {
                    state.error = None;
                }
            });

            let (id, outcome) = self
                .run_fetch(key, fetcher, options.dedupe, last_id, &token)
                .await;
            last_id = Some(id);

            if token.is_cancelled() || matches!(outcome, Err(QueryError::Cancelled)) {
                self.mark_idle(key);
                debug!(key = %key, "query cancelled");
                return Err(QueryError::Cancelled);
            }

            match outcome {
                Ok(data) => {
                    self.store_success(key, data.clone());
                    return Ok(data);
                }
                Err(err) => {
                    attempt += 1;
                    let keep = options.keep_previous_data;
                    self.update_state(key, |state| {
                        state.retry_count = attempt;
                        state.error = Some(err.clone());
                        if !keep {
                            state.data = None;
                        }
                        state.is_loading = false;
                        state.is_fetching = false;
                    });

                    if attempt > options.retry {
                        warn!(key = %key, attempts = attempt, error = %err, "query failed");
                        return Err(err);
                    }

                    let delay = options.backoff(attempt);
                    debug!(
                        key = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying query"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {
                            self.mark_idle(key);
                            return Err(QueryError::Cancelled);
                        }
                    }
                }
            }
        }
    }

    /// Awaits a fetch for `key` and returns its id with the result.
    ///
    /// With `dedupe`, a registered fetch newer than `after` is joined, and a
    /// fresh fetch is registered for others to join.
    async fn run_fetch(
        &self,
        key: &str,
        fetcher: &Fetcher<T>,
        dedupe: bool,
        after: Option<u64>,
        token: &CancellationToken,
    ) -> (u64, Result<T, QueryError>) {
        let (id, fetch) = {
            let mut in_flight = self.inner.in_flight.lock();
            let existing = in_flight
                .get(key)
                .filter(|f| dedupe && after.map_or(true, |last| f.id > last))
                .map(|f| (f.id, f.fetch.clone()));
            match existing {
                Some(found) => {
                    debug!(key = %key, "joining in-flight fetch");
                    found
                }
                None => {
                    let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                    let fetch = guarded(fetcher(token.clone()), token.clone())
                        .boxed()
                        .shared();
                    if dedupe {
                        in_flight.insert(
                            key.to_string(),
                            InFlight {
                                id,
                                fetch: fetch.clone(),
                            },
                        );
                    }
                    (id, fetch)
                }
            }
        };

        let result = fetch.await;
        self.settle(key, id);
        (id, result)
    }

    /// Removes the registry entry for a finished fetch, unless a newer one
    /// replaced it.
    fn settle(&self, key: &str, id: u64) {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight.get(key).is_some_and(|f| f.id == id) {
            in_flight.remove(key);
        }
    }

    fn store_success(&self, key: &str, data: T) {
        let now = self.now_ms();
        self.update_state(key, |state| {
            state.data = Some(data.clone());
            state.error = None;
            state.is_loading = false;
            state.is_fetching = false;
            state.last_fetch = now;
            state.retry_count = 0;
        });
        self.inner.cache.lock().set(key, data);
    }

    fn mark_idle(&self, key: &str) {
        if let Some(state) = self.inner.queries.lock().get_mut(key) {
            state.is_loading = false;
            state.is_fetching = false;
        }
    }

    fn token_for(&self, key: &str) -> CancellationToken {
        self.inner
            .tokens
            .lock()
            .entry(key.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    fn invalidate_key(&self, key: &str) {
        self.inner.queries.lock().remove(key);
        self.inner.in_flight.lock().remove(key);
        let token = self.inner.tokens.lock().remove(key);
        if let Some(token) = token {
            token.cancel();
        }
        self.inner.cache.lock().delete(key);
        debug!(key = %key, "query invalidated");
    }
}

impl<T: QueryData> Default for QueryManager<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TIME)
    }
}

/// Resolves to `Cancelled` as soon as the token fires.
async fn guarded<T>(fetch: FetchFuture<T>, token: CancellationToken) -> Result<T, QueryError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(QueryError::Cancelled),
        result = fetch => result,
    }
}
