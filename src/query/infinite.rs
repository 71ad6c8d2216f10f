//! Paged queries: an ordered list of pages, each fetched through the query
//! manager and cached under its own key.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::QueryError;
use crate::query::{FetchFuture, Fetcher, QueryData, QueryKey, QueryManager, QueryOptions};

/// Page parameters end up in page keys, so they must serialize.
pub trait PageParam: Clone + Serialize + Send + Sync + 'static {}

impl<P> PageParam for P where P: Clone + Serialize + Send + Sync + 'static {}

/// Produces the page for a param.
pub type PageFetcher<T, P> = Arc<dyn Fn(P, CancellationToken) -> FetchFuture<T> + Send + Sync>;

/// Derives the param of the page after the last one (or before the first)
/// from that page and all loaded pages. `None` means there is no such page.
pub type PageParamFn<T, P> = Arc<dyn Fn(&T, &[T]) -> Option<P> + Send + Sync>;

/// Wraps an async closure as a [`PageFetcher`], turning its error into
/// [`QueryError::Fetch`].
pub fn page_fetcher<T, P, E, F, Fut>(f: F) -> PageFetcher<T, P>
where
    T: QueryData,
    P: PageParam,
    E: fmt::Display,
    F: Fn(P, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Arc::new(move |param, token| {
        f(param, token)
            .map(|result| result.map_err(|err| QueryError::Fetch(err.to_string())))
            .boxed()
    })
}

// == Infinite Data ==
/// Loaded pages in display order, with the param each was fetched with.
#[derive(Debug, Clone, PartialEq)]
pub struct InfiniteData<T, P> {
    pub pages: Vec<T>,
    pub page_params: Vec<P>,
}

impl<T, P> Default for InfiniteData<T, P> {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            page_params: Vec::new(),
        }
    }
}

// == Infinite Query Result ==
#[derive(Debug, Clone)]
pub struct InfiniteQueryResult<T, P> {
    pub data: InfiniteData<T, P>,
    /// Error of the last page fetch, cleared by the next success
    pub error: Option<QueryError>,
    /// Fetching the first page
    pub is_loading: bool,
    pub is_error: bool,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub is_fetching_next_page: bool,
    pub is_fetching_previous_page: bool,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Initial,
    Next,
    Previous,
}

struct Pages<T, P> {
    data: InfiniteData<T, P>,
    error: Option<QueryError>,
    loading: bool,
    fetching_next: bool,
    fetching_previous: bool,
}

impl<T, P> Pages<T, P> {
    fn flag_mut(&mut self, slot: Slot) -> &mut bool {
        match slot {
            Slot::Initial => &mut self.loading,
            Slot::Next => &mut self.fetching_next,
            Slot::Previous => &mut self.fetching_previous,
        }
    }
}

/// Clears a fetching flag when the fetch ends, including when the caller
/// drops the future.
struct Fetching<'a, T, P> {
    pages: &'a Mutex<Pages<T, P>>,
    slot: Slot,
}

impl<T, P> Drop for Fetching<'_, T, P> {
    fn drop(&mut self) {
        *self.pages.lock().flag_mut(self.slot) = false;
    }
}

// == Infinite Query ==
/// A paged query. Page `p` is cached under `<key>:<json(p)>`, so pages are
/// deduplicated, retried and shared like any other query key.
pub struct InfiniteQuery<T: QueryData, P: PageParam> {
    key: QueryKey,
    fetcher: PageFetcher<T, P>,
    options: QueryOptions,
    manager: QueryManager<T>,
    initial_page_param: P,
    next_page_param: Option<PageParamFn<T, P>>,
    previous_page_param: Option<PageParamFn<T, P>>,
    pages: Mutex<Pages<T, P>>,
}

impl<T: QueryData> QueryManager<T> {
    /// Creates a paged query starting at `initial_page_param`. Without
    /// [`InfiniteQuery::next_page_param`] or
    /// [`InfiniteQuery::previous_page_param`] it holds a single page.
    pub fn use_infinite_query<P: PageParam>(
        &self,
        key: impl Into<QueryKey>,
        fetcher: PageFetcher<T, P>,
        initial_page_param: P,
        options: QueryOptions,
    ) -> InfiniteQuery<T, P> {
        InfiniteQuery {
            key: key.into(),
            fetcher,
            options,
            manager: self.clone(),
            initial_page_param,
            next_page_param: None,
            previous_page_param: None,
            pages: Mutex::new(Pages {
                data: InfiniteData::default(),
                error: None,
                loading: false,
                fetching_next: false,
                fetching_previous: false,
            }),
        }
    }
}

impl<T: QueryData, P: PageParam> InfiniteQuery<T, P> {
    pub fn next_page_param<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &[T]) -> Option<P> + Send + Sync + 'static,
    {
        self.next_page_param = Some(Arc::new(f));
        self
    }

    pub fn previous_page_param<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &[T]) -> Option<P> + Send + Sync + 'static,
    {
        self.previous_page_param = Some(Arc::new(f));
        self
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Cache key of the page fetched with `param`.
    pub fn page_key(&self, param: &P) -> Result<String, QueryError> {
        let encoded = serde_json::to_string(param)
            .map_err(|err| QueryError::Fetch(format!("unencodable page param: {}", err)))?;
        Ok(format!("{}:{}", self.key, encoded))
    }

    // == Load ==
    /// Fetches the first page. A no-op once pages are loaded.
    pub async fn load(&self) -> InfiniteQueryResult<T, P> {
        let guard = {
            let mut pages = self.pages.lock();
            if !self.options.enabled || pages.loading || !pages.data.pages.is_empty() {
                return self.snapshot(&pages);
            }
            pages.loading = true;
            Fetching {
                pages: &self.pages,
                slot: Slot::Initial,
            }
        };

        let param = self.initial_page_param.clone();
        let outcome = self.fetch_page(param.clone()).await;
        self.apply(outcome, param, Slot::Initial);
        drop(guard);
        self.result()
    }

    // == Fetch Next / Previous Page ==
    /// Appends the page after the last one. A no-op when there is none or
    /// one is already being fetched.
    pub async fn fetch_next_page(&self) -> InfiniteQueryResult<T, P> {
        self.fetch_adjacent(Slot::Next).await
    }

    /// Prepends the page before the first one. A no-op when there is none
    /// or one is already being fetched.
    pub async fn fetch_previous_page(&self) -> InfiniteQueryResult<T, P> {
        self.fetch_adjacent(Slot::Previous).await
    }

    pub fn has_next_page(&self) -> bool {
        self.adjacent_param(&self.pages.lock().data, Slot::Next)
            .is_some()
    }

    pub fn has_previous_page(&self) -> bool {
        self.adjacent_param(&self.pages.lock().data, Slot::Previous)
            .is_some()
    }

    pub fn result(&self) -> InfiniteQueryResult<T, P> {
        let pages = self.pages.lock();
        self.snapshot(&pages)
    }

    /// Invalidates every page key and drops the loaded pages. Returns how
    /// many page keys had live state.
    pub fn invalidate(&self) -> usize {
        let invalidated = self
            .manager
            .invalidate_queries(&format!("{}:", self.key));
        let mut pages = self.pages.lock();
        pages.data = InfiniteData::default();
        pages.error = None;
        invalidated
    }

    async fn fetch_adjacent(&self, slot: Slot) -> InfiniteQueryResult<T, P> {
        let (param, guard) = {
            let mut pages = self.pages.lock();
            let param = match self.adjacent_param(&pages.data, slot) {
                Some(param) if !*pages.flag_mut(slot) => param,
                _ => return self.snapshot(&pages),
            };
            *pages.flag_mut(slot) = true;
            let guard = Fetching {
                pages: &self.pages,
                slot,
            };
            (param, guard)
        };

        let outcome = self.fetch_page(param.clone()).await;
        self.apply(outcome, param, slot);
        drop(guard);
        self.result()
    }

    /// Fresh cached pages are used as is, anything else goes through the
    /// manager.
    async fn fetch_page(&self, param: P) -> Result<T, QueryError> {
        let key = self.page_key(&param)?;
        let fresh = self.manager.state(&key).is_some_and(|state| {
            !state.is_stale(self.manager.now_ms(), self.options.stale_time)
        });
        if fresh {
            if let Some(page) = self.manager.cached(&key) {
                debug!(key = %key, "page served from cache");
                return Ok(page);
            }
        }

        let fetcher = Arc::clone(&self.fetcher);
        let page: Fetcher<T> = Arc::new(move |token| fetcher(param.clone(), token));
        self.manager.execute(&key, &page, &self.options).await
    }

    fn apply(&self, outcome: Result<T, QueryError>, param: P, slot: Slot) {
        let mut pages = self.pages.lock();
        match outcome {
            Ok(page) => {
                pages.error = None;
                let data = &mut pages.data;
                match slot {
                    Slot::Initial => {
                        data.pages = vec![page];
                        data.page_params = vec![param];
                    }
                    Slot::Next => {
                        data.pages.push(page);
                        data.page_params.push(param);
                    }
                    Slot::Previous => {
                        data.pages.insert(0, page);
                        data.page_params.insert(0, param);
                    }
                }
            }
            Err(err) => {
                debug!(key = %self.key, slot = ?slot, error = %err, "page fetch failed");
                pages.error = Some(err);
            }
        }
    }

    fn adjacent_param(&self, data: &InfiniteData<T, P>, slot: Slot) -> Option<P> {
        match slot {
            Slot::Initial => None,
            Slot::Next => {
                let f = self.next_page_param.as_ref()?;
                f(data.pages.last()?, &data.pages)
            }
            Slot::Previous => {
                let f = self.previous_page_param.as_ref()?;
                f(data.pages.first()?, &data.pages)
            }
        }
    }

    fn snapshot(&self, pages: &Pages<T, P>) -> InfiniteQueryResult<T, P> {
        InfiniteQueryResult {
            data: pages.data.clone(),
            error: pages.error.clone(),
            is_loading: pages.loading,
            is_error: pages.error.is_some(),
            has_next_page: self.adjacent_param(&pages.data, Slot::Next).is_some(),
            has_previous_page: self.adjacent_param(&pages.data, Slot::Previous).is_some(),
            is_fetching_next_page: pages.fetching_next,
            is_fetching_previous_page: pages.fetching_previous,
        }
    }
}
