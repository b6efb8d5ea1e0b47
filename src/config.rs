//! Client configuration.
//!
//! `ApiConfig` deserializes from any serde format with every field optional; missing fields take
//! the defaults below. Call [`ApiConfig::validate`] (the [`ApiBuilder`](crate::ApiBuilder) does it
//! for you) before handing it to the pipeline.
//!
//! ```rust
//! use bucketry::ApiConfig;
//!
//! let config: ApiConfig = serde_json::from_str(r#"{ "global_rate_limit_max": 40 }"#).unwrap();
//! assert_eq!(config.global_rate_limit_max, 40);
//! assert_eq!(config.queue_interval_ms, 100);
//! config.validate().unwrap();
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::ConfigError;

/// Tunables for the cache, queue and authority reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Sends admitted per global window, across all buckets.
    pub global_rate_limit_max: u32,
    pub global_rate_limit_window_ms: u64,
    /// Safety margin added to every global window.
    pub global_rate_limit_padding_ms: u64,
    /// Idle time after which a per-key rate limit is forgotten.
    pub sweep_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    pub queue_interval_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Start the queue tick and the sweeper when the client is built.
    pub autostart: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            global_rate_limit_max: 50,
            global_rate_limit_window_ms: 1_000,
            global_rate_limit_padding_ms: 50,
            sweep_ttl_ms: 300_000,
            sweep_interval_ms: 300_000,
            queue_interval_ms: 100,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 10_000,
            autostart: true,
        }
    }
}

impl ApiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_rate_limit_max(mut self, max: u32) -> Self {
        self.global_rate_limit_max = max;
        self
    }

    pub fn global_rate_limit_window(mut self, window: Duration) -> Self {
        self.global_rate_limit_window_ms = millis(window);
        self
    }

    pub fn global_rate_limit_padding(mut self, padding: Duration) -> Self {
        self.global_rate_limit_padding_ms = millis(padding);
        self
    }

    pub fn sweep_ttl(mut self, ttl: Duration) -> Self {
        self.sweep_ttl_ms = millis(ttl);
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = millis(interval);
        self
    }

    pub fn queue_interval(mut self, interval: Duration) -> Self {
        self.queue_interval_ms = millis(interval);
        self
    }

    pub fn reconnect(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_ms = millis(base);
        self.reconnect_max_ms = millis(max);
        self
    }

    pub fn autostart(mut self, enabled: bool) -> Self {
        self.autostart = enabled;
        self
    }

    /// Reject settings that would stall a timer or admit nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global_rate_limit_max == 0 {
            return Err(ConfigError::ZeroGlobalMax);
        }
        for (field, value) in [
            ("global_rate_limit_window_ms", self.global_rate_limit_window_ms),
            ("sweep_ttl_ms", self.sweep_ttl_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("queue_interval_ms", self.queue_interval_ms),
            ("reconnect_base_ms", self.reconnect_base_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field, value: Duration::ZERO });
            }
        }
        self.reconnect_backoff().map(|_| ())
    }

    /// Linear reconnection schedule from `reconnect_base_ms` capped at `reconnect_max_ms`.
    pub fn reconnect_backoff(&self) -> Result<Backoff, ConfigError> {
        Ok(Backoff::linear(Duration::from_millis(self.reconnect_base_ms))
            .with_max(Duration::from_millis(self.reconnect_max_ms))?)
    }

    pub fn sweep_interval_duration(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn queue_interval_duration(&self) -> Duration {
        Duration::from_millis(self.queue_interval_ms)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffError;

    #[test]
    fn defaults_are_valid() {
        let config = ApiConfig::default();
        config.validate().unwrap();
        assert_eq!(config.global_rate_limit_max, 50);
        assert_eq!(config.sweep_ttl_ms, 300_000);
        assert_eq!(config.reconnect_backoff().unwrap(), Backoff::default());
    }

    #[test]
    fn zero_values_are_rejected() {
        assert_eq!(
            ApiConfig::new().global_rate_limit_max(0).validate(),
            Err(ConfigError::ZeroGlobalMax)
        );
        let err = ApiConfig::new().queue_interval(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { field: "queue_interval_ms", .. }));
    }

    #[test]
    fn reconnect_cap_below_base_is_rejected() {
        let err = ApiConfig::new()
            .reconnect(Duration::from_secs(5), Duration::from_secs(1))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Backoff(BackoffError::MaxLessThanBase { .. })));
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: ApiConfig =
            serde_json::from_value(serde_json::json!({ "autostart": false })).unwrap();
        assert!(!config.autostart);
        assert_eq!(config.global_rate_limit_padding_ms, 50);
    }
}
