//! Retry & backoff policy (spec §4.1).

use catalog_core::error::http_status;
use std::sync::Arc;
use std::time::Duration;

use super::transport::NetworkResponse;

/// `backdown_strategy(initial_ms, attempt) -> sleep_ms`.
pub type BackdownStrategy = Arc<dyn Fn(u64, u32) -> u64 + Send + Sync>;

/// `retry_condition(response) -> should_retry`.
pub type RetryCondition = Arc<dyn Fn(&NetworkResponse) -> bool + Send + Sync>;

/// Retry/backoff configuration (spec §4.1, §6).
#[derive(Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub timeout_sec: u64,
    pub initial_backdown_ms: u64,
    pub backdown_strategy: BackdownStrategy,
    pub retry_condition: RetryCondition,
}

impl RetrySettings {
    /// Sleep duration before the given attempt (1-indexed).
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis((self.backdown_strategy)(self.initial_backdown_ms, attempt))
    }

    #[must_use]
    pub fn should_retry(&self, response: &NetworkResponse) -> bool {
        (self.retry_condition)(response)
    }
}

impl std::fmt::Debug for RetrySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrySettings")
            .field("max_attempts", &self.max_attempts)
            .field("timeout_sec", &self.timeout_sec)
            .field("initial_backdown_ms", &self.initial_backdown_ms)
            .finish_non_exhaustive()
    }
}

/// Default retry predicate (spec §4.1): transport errors
/// `{IO, OFFLINE, TIMEOUT, NETWORK_OVERLOAD}` and HTTP statuses
/// `{429, 500-511, 598, 599}`.
#[must_use]
pub fn default_retry_condition(response: &NetworkResponse) -> bool {
    match response.status {
        http_status::IO | http_status::OFFLINE | http_status::TIMEOUT | http_status::NETWORK_OVERLOAD => true,
        429 | 500..=511 | 598 | 599 => true,
        _ => false,
    }
}

/// Exponential backoff: `initial_ms * 2^(attempt - 1)`.
#[must_use]
pub fn exponential_backdown(initial_ms: u64, attempt: u32) -> u64 {
    initial_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(20))
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_sec: 60,
            initial_backdown_ms: 200,
            backdown_strategy: Arc::new(exponential_backdown),
            retry_condition: Arc::new(default_retry_condition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use catalog_core::NetworkStatistics;
    use std::collections::BTreeMap;

    fn response(status: i32) -> NetworkResponse {
        NetworkResponse {
            status,
            headers: BTreeMap::new(),
            body: Bytes::new(),
            stats: NetworkStatistics::default(),
        }
    }

    #[test]
    fn default_retry_condition_matches_spec_set() {
        for status in [http_status::IO, http_status::OFFLINE, http_status::TIMEOUT, http_status::NETWORK_OVERLOAD] {
            assert!(default_retry_condition(&response(status)));
        }
        for status in [429, 500, 511, 598, 599] {
            assert!(default_retry_condition(&response(status)));
        }
        for status in [200, 404, 400, 401] {
            assert!(!default_retry_condition(&response(status)));
        }
    }

    #[test]
    fn exponential_backdown_doubles_each_attempt() {
        assert_eq!(exponential_backdown(100, 1), 100);
        assert_eq!(exponential_backdown(100, 2), 200);
        assert_eq!(exponential_backdown(100, 3), 400);
    }
}
