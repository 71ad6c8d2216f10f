//! Query Module
//!
//! Async data fetching on top of the cache: per-key state, request
//! deduplication, retry with exponential backoff, staleness, polling and
//! cancellation, paged (infinite) queries, plus one-shot mutations.

mod infinite;
mod manager;
mod mutation;
mod observer;
mod options;
mod state;

pub use infinite::{
    page_fetcher, InfiniteData, InfiniteQuery, InfiniteQueryResult, PageFetcher, PageParam,
    PageParamFn,
};
pub use manager::{fetcher, FetchFuture, Fetcher, QueryData, QueryManager, DEFAULT_CACHE_TIME};
pub use mutation::{Mutation, MutationState};
pub use observer::Query;
pub use options::{QueryKey, QueryOptions};
pub use state::{QueryResult, QueryState};
