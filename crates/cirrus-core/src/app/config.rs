//! Configuration loading from environment variables.

use std::time::Duration;

use super::scheduler::SchedulerSettings;

/// Runtime host configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// How long the scheduler keeps re-invoking a service that has more work
    pub stay_window: Duration,
    /// Pause after a rotation where every service skipped
    pub idle_wait: Duration,
    /// How often restart triggers are polled
    pub restart_poll_interval: Duration,
    /// Default `tracing` filter when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stay_window: Duration::from_secs(60),
            idle_wait: Duration::from_secs(10),
            restart_poll_interval: Duration::from_secs(30),
            log_filter: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `CIRRUS_STAY_WINDOW_SECS`: greedy continuation window (default: 60)
    /// - `CIRRUS_IDLE_WAIT_SECS`: idle wait after a quiet rotation, non-zero (default: 10)
    /// - `CIRRUS_RESTART_POLL_SECS`: restart trigger polling interval, non-zero (default: 30)
    /// - `CIRRUS_LOG`: default log filter (default: info)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            stay_window: secs_var("CIRRUS_STAY_WINDOW_SECS", defaults.stay_window)?,
            idle_wait: positive_secs_var("CIRRUS_IDLE_WAIT_SECS", defaults.idle_wait)?,
            restart_poll_interval: positive_secs_var(
                "CIRRUS_RESTART_POLL_SECS",
                defaults.restart_poll_interval,
            )?,
            log_filter: std::env::var("CIRRUS_LOG").unwrap_or(defaults.log_filter),
        })
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            stay_window: self.stay_window,
            idle_wait: self.idle_wait,
        }
    }
}

fn secs_var(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid(key, "must be a whole number of seconds")),
        Err(_) => Ok(default),
    }
}

/// Like `secs_var`, but zero is refused: these pace a loop.
fn positive_secs_var(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let value = secs_var(key, default)?;
    if value.is_zero() {
        return Err(ConfigError::Invalid(key, "must be at least one second"));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
