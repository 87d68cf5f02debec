//! # Orchestrator Configuration
//!
//! Tunables for queues, rate limits, the resolver pipeline, backend joins and
//! session lifetime.
//!
//! ## Overview
//!
//! [`OrchestratorConfig`] can be deserialized from any serde format (every
//! field has a default, so partial documents are fine) or assembled with
//! [`OrchestratorConfig::builder`]. Durations use fractional seconds on the
//! wire, under `*_seconds` keys:
//!
//! ```json
//! {
//!   "max_queue_length": 25,
//!   "command_cooldown_seconds": 1.5,
//!   "resolver_backoff": { "base_delay_seconds": 0.5, "multiplier": 2.0, "max_delay_seconds": 4.0 }
//! }
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::config::OrchestratorConfig;
//! use std::time::Duration;
//!
//! let config = OrchestratorConfig::builder()
//!     .max_queue_length(20)
//!     .command_cooldown(Duration::from_secs(1))
//!     .resolver_pool_size(2)
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.max_queue_length, 20);
//! ```
//!
//! ## Validation
//!
//! `build()` and [`OrchestratorConfig::validate`] fail fast with
//! [`Error::Config`] naming the offending field. Deserialized configs should
//! be validated before use.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound accepted for `max_queue_length`.
pub const MAX_QUEUE_LENGTH_LIMIT: usize = 100;

// ============================================================================
// Retry Policies
// ============================================================================

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first retry.
    #[serde(rename = "base_delay_seconds", with = "duration_secs")]
    pub base_delay: Duration,

    /// Growth factor applied per retry. Must be >= 1.0.
    pub multiplier: f64,

    /// Ceiling for any single delay.
    #[serde(rename = "max_delay_seconds", with = "duration_secs")]
    pub max_delay: Duration,
}

impl Backoff {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Delay to wait before retry number `attempt` (1-based).
    ///
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Bounded retry policy: how many retries follow the first attempt, and how
/// long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Backoff::new(Duration::ZERO, 1.0, Duration::ZERO))
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns the delay before `attempt` (1-based count of attempts already
    /// made), or `None` once retries are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt <= self.max_retries).then(|| self.backoff.delay_for(attempt))
    }
}

// ============================================================================
// Orchestrator Configuration
// ============================================================================

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum tracks per session queue, the playing track included.
    ///
    /// Default: 50. Valid range: 1..=100.
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,

    /// Minimum interval between accepted commands in one session.
    ///
    /// Zero disables the cooldown. Default: 2 seconds.
    #[serde(
        rename = "command_cooldown_seconds",
        with = "duration_secs",
        default = "default_command_cooldown"
    )]
    pub command_cooldown: Duration,

    /// Commands one user may issue per `window`.
    ///
    /// Zero disables the per-user cap. Default: 20.
    #[serde(default = "default_per_user_requests_per_window")]
    pub per_user_requests_per_window: u32,

    /// Rolling window for the per-user cap. Default: 60 seconds.
    #[serde(
        rename = "window_seconds",
        with = "duration_secs",
        default = "default_window"
    )]
    pub window: Duration,

    /// Lifetime of a resolution cache entry. Default: 600 seconds.
    #[serde(
        rename = "resolution_cache_ttl_seconds",
        with = "duration_secs",
        default = "default_resolution_cache_ttl"
    )]
    pub resolution_cache_ttl: Duration,

    /// Maximum resolution cache entries before LRU eviction. Default: 512.
    #[serde(default = "default_resolution_cache_capacity")]
    pub resolution_cache_capacity: usize,

    /// Concurrent extraction calls allowed process-wide. Default: 4.
    #[serde(default = "default_resolver_pool_size")]
    pub resolver_pool_size: usize,

    /// Budget for one resolver attempt, pool wait included. Default: 30 seconds.
    #[serde(
        rename = "resolver_timeout_seconds",
        with = "duration_secs",
        default = "default_resolver_timeout"
    )]
    pub resolver_timeout: Duration,

    /// Retries after the first failed resolver attempt. Default: 3.
    #[serde(default = "default_resolver_max_retries")]
    pub resolver_max_retries: u32,

    /// Backoff between resolver retries. Default: 1s, x2, capped at 8s.
    #[serde(default = "default_resolver_backoff")]
    pub resolver_backoff: Backoff,

    /// Budget for one backend join attempt. Default: 15 seconds.
    #[serde(
        rename = "backend_join_timeout_seconds",
        with = "duration_secs",
        default = "default_backend_join_timeout"
    )]
    pub backend_join_timeout: Duration,

    /// Retries after the first failed join. Default: 2.
    #[serde(default = "default_backend_join_max_retries")]
    pub backend_join_max_retries: u32,

    /// Backoff between join retries. Default: 0.5s, x2, capped at 4s.
    #[serde(default = "default_backend_join_backoff")]
    pub backend_join_backoff: Backoff,

    /// Idle time after which an empty session is evicted. Default: 300 seconds.
    #[serde(
        rename = "session_idle_timeout_seconds",
        with = "duration_secs",
        default = "default_session_idle_timeout"
    )]
    pub session_idle_timeout: Duration,

    /// Period of the eviction and cache purge sweep. Default: 30 seconds.
    #[serde(
        rename = "maintenance_interval_seconds",
        with = "duration_secs",
        default = "default_maintenance_interval"
    )]
    pub maintenance_interval: Duration,

    /// Restrict pause/resume/skip/stop/leave to group admins. Default: false.
    #[serde(default)]
    pub admin_only_controls: bool,

    /// Broadcast capacity of the event bus. Default: 100.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_queue_length: default_max_queue_length(),
            command_cooldown: default_command_cooldown(),
            per_user_requests_per_window: default_per_user_requests_per_window(),
            window: default_window(),
            resolution_cache_ttl: default_resolution_cache_ttl(),
            resolution_cache_capacity: default_resolution_cache_capacity(),
            resolver_pool_size: default_resolver_pool_size(),
            resolver_timeout: default_resolver_timeout(),
            resolver_max_retries: default_resolver_max_retries(),
            resolver_backoff: default_resolver_backoff(),
            backend_join_timeout: default_backend_join_timeout(),
            backend_join_max_retries: default_backend_join_max_retries(),
            backend_join_backoff: default_backend_join_backoff(),
            session_idle_timeout: default_session_idle_timeout(),
            maintenance_interval: default_maintenance_interval(),
            admin_only_controls: false,
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Defaults with both rate limits switched off.
    ///
    /// Useful for load tests and for hosts that throttle upstream.
    pub fn unthrottled() -> Self {
        Self {
            command_cooldown: Duration::ZERO,
            per_user_requests_per_window: 0,
            ..Default::default()
        }
    }

    pub fn resolver_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.resolver_max_retries, self.resolver_backoff)
    }

    pub fn backend_join_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.backend_join_max_retries, self.backend_join_backoff)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_QUEUE_LENGTH_LIMIT).contains(&self.max_queue_length) {
            return Err(Error::Config(format!(
                "max_queue_length must be between 1 and {}",
                MAX_QUEUE_LENGTH_LIMIT
            )));
        }

        if self.per_user_requests_per_window > 0 && self.window.is_zero() {
            return Err(Error::Config(
                "window_seconds must be > 0 when a per-user cap is set".to_string(),
            ));
        }

        if self.resolution_cache_capacity == 0 {
            return Err(Error::Config(
                "resolution_cache_capacity must be > 0".to_string(),
            ));
        }

        if self.resolver_pool_size == 0 {
            return Err(Error::Config("resolver_pool_size must be > 0".to_string()));
        }

        if self.resolver_timeout.is_zero() {
            return Err(Error::Config(
                "resolver_timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.backend_join_timeout.is_zero() {
            return Err(Error::Config(
                "backend_join_timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.maintenance_interval.is_zero() {
            return Err(Error::Config(
                "maintenance_interval_seconds must be > 0".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config("event_buffer_size must be > 0".to_string()));
        }

        validate_backoff("resolver_backoff", &self.resolver_backoff)?;
        validate_backoff("backend_join_backoff", &self.backend_join_backoff)?;

        Ok(())
    }
}

fn validate_backoff(name: &str, backoff: &Backoff) -> Result<()> {
    if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
        return Err(Error::Config(format!(
            "{}.multiplier must be a finite value >= 1.0",
            name
        )));
    }
    if backoff.max_delay < backoff.base_delay {
        return Err(Error::Config(format!(
            "{}.max_delay_seconds cannot be below base_delay_seconds",
            name
        )));
    }
    Ok(())
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`OrchestratorConfig`]. Unset fields keep their defaults.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn max_queue_length(mut self, len: usize) -> Self {
        self.config.max_queue_length = len;
        self
    }

    pub fn command_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.command_cooldown = cooldown;
        self
    }

    pub fn per_user_limit(mut self, requests: u32, window: Duration) -> Self {
        self.config.per_user_requests_per_window = requests;
        self.config.window = window;
        self
    }

    pub fn resolution_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.resolution_cache_ttl = ttl;
        self
    }

    pub fn resolution_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.resolution_cache_capacity = capacity;
        self
    }

    pub fn resolver_pool_size(mut self, size: usize) -> Self {
        self.config.resolver_pool_size = size;
        self
    }

    pub fn resolver_timeout(mut self, timeout: Duration) -> Self {
        self.config.resolver_timeout = timeout;
        self
    }

    pub fn resolver_retries(mut self, max_retries: u32, backoff: Backoff) -> Self {
        self.config.resolver_max_retries = max_retries;
        self.config.resolver_backoff = backoff;
        self
    }

    pub fn backend_join_timeout(mut self, timeout: Duration) -> Self {
        self.config.backend_join_timeout = timeout;
        self
    }

    pub fn backend_join_retries(mut self, max_retries: u32, backoff: Backoff) -> Self {
        self.config.backend_join_max_retries = max_retries;
        self.config.backend_join_backoff = backoff;
        self
    }

    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_idle_timeout = timeout;
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    pub fn admin_only_controls(mut self, enabled: bool) -> Self {
        self.config.admin_only_controls = enabled;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<OrchestratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_max_queue_length() -> usize {
    50
}

fn default_command_cooldown() -> Duration {
    Duration::from_secs(2)
}

fn default_per_user_requests_per_window() -> u32 {
    20
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

fn default_resolution_cache_ttl() -> Duration {
    Duration::from_secs(600)
}

fn default_resolution_cache_capacity() -> usize {
    512
}

fn default_resolver_pool_size() -> usize {
    4
}

fn default_resolver_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_resolver_max_retries() -> u32 {
    3
}

fn default_resolver_backoff() -> Backoff {
    Backoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(8))
}

fn default_backend_join_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_backend_join_max_retries() -> u32 {
    2
}

fn default_backend_join_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(500), 2.0, Duration::from_secs(4))
}

fn default_session_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_maintenance_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_event_buffer_size() -> usize {
    crate::events::DEFAULT_EVENT_BUFFER_SIZE
}

/// Serde adapter storing a `Duration` as fractional seconds.
mod duration_secs {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| de::Error::custom(format!("invalid duration {}: {}", secs, e)))
    }
}
