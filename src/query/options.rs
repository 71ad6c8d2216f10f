//! Query options and keys.

use std::fmt;
use std::time::Duration;

// == Query Options ==
/// Per-observer behavior of a query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Disabled queries never fetch
    pub enabled: bool,
    /// Retries after the first failed attempt
    pub retry: u32,
    /// Base delay, doubled on every further retry
    pub retry_delay: Duration,
    /// Age after which fetched data counts as stale; zero means always stale
    pub stale_time: Duration,
    /// Poll period, if any
    pub refetch_interval: Option<Duration>,
    pub refetch_on_window_focus: bool,
    pub refetch_on_reconnect: bool,
    /// Share one in-flight fetch between concurrent callers of a key
    pub dedupe: bool,
    /// Keep the last good data when a fetch fails or an observer unmounts
    pub keep_previous_data: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            retry: 3,
            retry_delay: Duration::from_millis(1000),
            stale_time: Duration::ZERO,
            refetch_interval: None,
            refetch_on_window_focus: false,
            refetch_on_reconnect: true,
            dedupe: true,
            keep_previous_data: false,
        }
    }
}

impl QueryOptions {
    /// Delay before retry number `attempt` (1-based):
    /// `retry_delay * 2^(attempt - 1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }
}

// == Query Key ==
/// Identifies a query. Composite keys are joined with `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for QueryKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&[&str]> for QueryKey {
    fn from(parts: &[&str]) -> Self {
        Self(parts.join(":"))
    }
}

impl<const N: usize> From<[&str; N]> for QueryKey {
    fn from(parts: [&str; N]) -> Self {
        Self(parts.join(":"))
    }
}

impl From<Vec<String>> for QueryKey {
    fn from(parts: Vec<String>) -> Self {
        Self(parts.join(":"))
    }
}
