//! Query observers: one mounted consumer of a key.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::query::{Fetcher, QueryData, QueryKey, QueryManager, QueryOptions, QueryResult};

// == Query ==
/// A mounted query. Dropping it stops polling and detaches from the
/// manager.
pub struct Query<T: QueryData> {
    key: QueryKey,
    fetcher: Fetcher<T>,
    options: QueryOptions,
    manager: QueryManager<T>,
    poller: Option<JoinHandle<()>>,
}

impl<T: QueryData> Query<T> {
    pub(crate) fn mount(
        manager: QueryManager<T>,
        key: QueryKey,
        fetcher: Fetcher<T>,
        options: QueryOptions,
    ) -> Self {
        manager.attach(key.as_str());
        manager.seed(key.as_str(), options.enabled);

        let poller = match (options.enabled, options.refetch_interval) {
            (true, Some(period)) if !period.is_zero() => match Handle::try_current() {
                Ok(handle) => Some(handle.spawn(poll(
                    manager.clone(),
                    key.clone(),
                    fetcher.clone(),
                    options.clone(),
                    period,
                ))),
                Err(_) => {
                    warn!(key = %key, "no async runtime, polling disabled");
                    None
                }
            },
            _ => None,
        };

        Self {
            key,
            fetcher,
            options,
            manager,
            poller,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    // == Load ==
    /// Initial load: fresh cached data is used as is, anything else fetches.
    pub async fn load(&self) -> QueryResult<T> {
        if !self.options.enabled {
            return self.result();
        }
        if !self.is_stale() {
            if let Some(cached) = self.manager.cached(self.key.as_str()) {
                self.manager.update_state(self.key.as_str(), |state| {
                    state.data = Some(cached);
                    state.is_loading = false;
                });
                return self.result();
            }
        }
        self.run().await
    }

    // == Refetch ==
    /// Fetches again with a fresh retry budget.
    pub async fn refetch(&self) -> QueryResult<T> {
        self.manager
            .update_state(self.key.as_str(), |state| state.retry_count = 0);
        self.run().await
    }

    /// Drops this key's state and cached data and cancels its fetch.
    pub fn invalidate(&self) {
        self.manager.invalidate(self.key.clone());
    }

    /// Window-focus trigger. Refetches stale data when enabled by options.
    pub async fn on_window_focus(&self) -> Option<QueryResult<T>> {
        if !self.options.refetch_on_window_focus || !self.options.enabled || !self.is_stale() {
            return None;
        }
        Some(self.run().await)
    }

    /// Reconnect trigger. Refetches unconditionally when enabled by options.
    pub async fn on_reconnect(&self) -> Option<QueryResult<T>> {
        if !self.options.refetch_on_reconnect || !self.options.enabled {
            return None;
        }
        Some(self.run().await)
    }

    // == Result ==
    pub fn result(&self) -> QueryResult<T> {
        match self.manager.state(self.key.as_str()) {
            Some(state) => {
                let is_stale = state.is_stale(self.manager.now_ms(), self.options.stale_time);
                QueryResult::from_state(&state, is_stale)
            }
            None => QueryResult::idle(self.options.enabled),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.manager
            .state(self.key.as_str())
            .map_or(true, |state| {
                state.is_stale(self.manager.now_ms(), self.options.stale_time)
            })
    }

    async fn run(&self) -> QueryResult<T> {
        if let Err(err) = self
            .manager
            .execute(self.key.as_str(), &self.fetcher, &self.options)
            .await
        {
            debug!(key = %self.key, error = %err, "query settled with error");
        }
        self.result()
    }
}

impl<T: QueryData> Drop for Query<T> {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.manager
            .detach(self.key.as_str(), self.options.keep_previous_data);
    }
}

// == Polling ==
/// Refetches every `period`, starting one period after mount.
async fn poll<T: QueryData>(
    manager: QueryManager<T>,
    key: QueryKey,
    fetcher: Fetcher<T>,
    options: QueryOptions,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(err) = manager.execute(key.as_str(), &fetcher, &options).await {
            debug!(key = %key, error = %err, "poll fetch failed");
        }
    }
}
