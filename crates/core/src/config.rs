//! Env-driven defaults. Absent or unparsable values fall back to the default.

use std::str::FromStr;
use std::time::Duration;

pub const POLL_DELAY_ENV: &str = "VIGIL_POLL_DELAY_SECS";
pub const REMINDER_ENV: &str = "VIGIL_REMINDER_SECS";
pub const MAX_WORKERS_ENV: &str = "VIGIL_MAX_WORKERS";
pub const KUBECTL_TIMEOUT_ENV: &str = "VIGIL_KUBECTL_TIMEOUT";
pub const FETCH_ATTEMPTS_ENV: &str = "VIGIL_FETCH_ATTEMPTS";
pub const BACKOFF_BASE_ENV: &str = "VIGIL_BACKOFF_BASE_MS";
pub const BACKOFF_MAX_ENV: &str = "VIGIL_BACKOFF_MAX_MS";
pub const METRICS_ADDR_ENV: &str = "VIGIL_METRICS_ADDR";

pub fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok()).unwrap_or(default)
}

pub fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(key, default))
}

pub fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_parse(key, default))
}

/// Defaults shared by the watch loop and the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDefaults {
    pub poll_delay: Duration,
    pub reminder_interval: Duration,
    pub max_workers: usize,
    pub kubectl_timeout: String,
    pub fetch_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_secs(3),
            reminder_interval: Duration::from_secs(30),
            max_workers: 8,
            kubectl_timeout: "30s".to_string(),
            fetch_attempts: 5,
            backoff_base: Duration::from_millis(1000),
            backoff_max: Duration::from_millis(16_000),
        }
    }
}

impl RuntimeDefaults {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_delay: env_secs(POLL_DELAY_ENV, d.poll_delay.as_secs()),
            reminder_interval: env_secs(REMINDER_ENV, d.reminder_interval.as_secs()),
            max_workers: env_parse(MAX_WORKERS_ENV, d.max_workers).max(1),
            kubectl_timeout: std::env::var(KUBECTL_TIMEOUT_ENV).unwrap_or(d.kubectl_timeout),
            fetch_attempts: env_parse(FETCH_ATTEMPTS_ENV, d.fetch_attempts).max(1),
            backoff_base: env_millis(BACKOFF_BASE_ENV, d.backoff_base.as_millis() as u64),
            backoff_max: env_millis(BACKOFF_MAX_ENV, d.backoff_max.as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("VIGIL_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse("VIGIL_TEST_GARBAGE", 7usize), 7);
        std::env::set_var("VIGIL_TEST_GARBAGE", " 12 ");
        assert_eq!(env_parse("VIGIL_TEST_GARBAGE", 7usize), 12);
        std::env::remove_var("VIGIL_TEST_GARBAGE");
    }
}
