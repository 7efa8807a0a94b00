//! Resilient connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// Default capacity of the state transition history
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Configuration for a resilient connection
///
/// Supplied once at construction and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Reconnect attempts allowed before giving up
    pub max_attempts: u32,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,

    /// How long a single attempt may take to open
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Number of state transitions kept in the history
    pub history_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(10),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    /// Check value ranges, naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "history_capacity must be greater than 0".to_string(),
            ));
        }
        self.backoff.validate()
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Cap applied before jitter
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Growth factor per attempt
    pub multiplier: f64,

    /// Upper bound (exclusive) of the random jitter added after the cap
    #[serde(with = "duration_millis")]
    pub jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::Invalid(format!(
                "initial_delay ({:?}) must not exceed max_delay ({:?})",
                self.initial_delay, self.max_delay
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "multiplier must be a finite number greater than 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}
