//! Per-key query state and the snapshot handed to observers.

use std::time::Duration;

use crate::error::QueryError;

// == Query State ==
/// Lifecycle state of one query key, owned by the query manager.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub error: Option<QueryError>,
    /// Fetching with no data to show yet
    pub is_loading: bool,
    /// Any fetch in progress, including background refetches
    pub is_fetching: bool,
    /// Unix ms of the last successful fetch, 0 if none
    pub last_fetch: u64,
    /// Consecutive failed attempts since the last success or refetch
    pub retry_count: u32,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            is_fetching: false,
            last_fetch: 0,
            retry_count: 0,
        }
    }
}

impl<T> QueryState<T> {
    /// Never-fetched data is stale, and so is everything when `stale_time`
    /// is zero.
    pub fn is_stale(&self, now: u64, stale_time: Duration) -> bool {
        if self.last_fetch == 0 || stale_time.is_zero() {
            return true;
        }
        now.saturating_sub(self.last_fetch) > stale_time.as_millis() as u64
    }
}

// == Query Result ==
/// What an observer sees.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    pub data: Option<T>,
    pub error: Option<QueryError>,
    pub is_loading: bool,
    pub is_error: bool,
    pub is_success: bool,
    pub is_fetching: bool,
    pub is_stale: bool,
}

impl<T: Clone> QueryResult<T> {
    pub fn from_state(state: &QueryState<T>, is_stale: bool) -> Self {
        Self {
            data: state.data.clone(),
            error: state.error.clone(),
            is_loading: state.is_loading,
            is_error: state.error.is_some(),
            is_success: state.error.is_none() && state.data.is_some(),
            is_fetching: state.is_fetching,
            is_stale,
        }
    }

    /// Result for a key with no state (never fetched or invalidated).
    pub fn idle(enabled: bool) -> Self {
        Self {
            data: None,
            error: None,
            is_loading: enabled,
            is_error: false,
            is_success: false,
            is_fetching: false,
            is_stale: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness() {
        let stale_time = Duration::from_millis(100);
        let mut state: QueryState<u8> = QueryState::default();
        assert!(state.is_stale(1_000, stale_time));

        state.last_fetch = 1_000;
        assert!(!state.is_stale(1_100, stale_time));
        assert!(state.is_stale(1_101, stale_time));
        assert!(state.is_stale(1_000, Duration::ZERO));
    }

    #[test]
    fn test_result_flags() {
        let mut state = QueryState {
            data: Some(1u8),
            ..QueryState::default()
        };
        let result = QueryResult::from_state(&state, false);
        assert!(result.is_success);
        assert!(!result.is_error);

        state.error = Some(QueryError::Fetch("boom".into()));
        let result = QueryResult::from_state(&state, true);
        assert!(result.is_error);
        assert!(!result.is_success);
    }

    #[test]
    fn test_idle_result() {
        let result: QueryResult<u8> = QueryResult::idle(true);
        assert!(result.is_loading);
        assert!(result.is_stale);
        assert!(!QueryResult::<u8>::idle(false).is_loading);
    }
}
