use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::retry::RetryPolicy;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ServiceRetryOverride {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BreakerSettings {
    #[serde(default = "BreakerSettings::default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "BreakerSettings::default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "BreakerSettings::default_half_open_timeout_seconds")]
    pub half_open_timeout_seconds: u64,
}

impl BreakerSettings {
    fn default_failure_threshold() -> u32 {
        5
    }

    fn default_success_threshold() -> u32 {
        2
    }

    fn default_half_open_timeout_seconds() -> u64 {
        60
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: Self::default_failure_threshold(),
            success_threshold: Self::default_success_threshold(),
            half_open_timeout_seconds: Self::default_half_open_timeout_seconds(),
        }
    }
}

/// Retry/timeout defaults plus per-service overrides, straight from the
/// gateway configuration file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResilienceConfig {
    #[serde(default = "ResilienceConfig::default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    #[serde(default = "ResilienceConfig::default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "ResilienceConfig::default_backoff_ms")]
    pub default_backoff_ms: u64,
    /// serviceName -> timeout seconds.
    #[serde(default)]
    pub service_timeouts: HashMap<String, u64>,
    /// serviceName -> retry overrides.
    #[serde(default)]
    pub service_retries: HashMap<String, ServiceRetryOverride>,
    /// Optional budget for a whole execution; when the remaining budget is
    /// shorter than a step's timeout, the remainder wins.
    #[serde(default)]
    pub execution_deadline_seconds: Option<u64>,
    #[serde(default)]
    pub breaker: BreakerSettings,
}

impl ResilienceConfig {
    fn default_timeout_seconds() -> u64 {
        30
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_backoff_ms() -> u64 {
        100
    }

    pub fn policy_for(&self, service: &str) -> RetryPolicy {
        let retries = self.service_retries.get(service);
        let max_retries = retries
            .and_then(|o| o.max_retries)
            .unwrap_or(self.default_max_retries);
        let backoff_ms = retries
            .and_then(|o| o.backoff_ms)
            .unwrap_or(self.default_backoff_ms);
        let timeout_seconds = self
            .service_timeouts
            .get(service)
            .copied()
            .unwrap_or(self.default_timeout_seconds);
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(backoff_ms),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            success_threshold: self.breaker.success_threshold,
            half_open_timeout: Duration::from_secs(self.breaker.half_open_timeout_seconds),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: Self::default_timeout_seconds(),
            default_max_retries: Self::default_max_retries(),
            default_backoff_ms: Self::default_backoff_ms(),
            service_timeouts: HashMap::new(),
            service_retries: HashMap::new(),
            execution_deadline_seconds: None,
            breaker: BreakerSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ResilienceConfig::default();
        let policy = config.policy_for("anything");
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff, Duration::from_millis(100));
        assert_eq!(policy.timeout, Duration::from_secs(30));
    }

    #[test]
    fn service_overrides_take_precedence() {
        let mut config = ResilienceConfig::default();
        config.service_timeouts.insert("orders".into(), 5);
        config.service_retries.insert(
            "orders".into(),
            ServiceRetryOverride {
                max_retries: Some(1),
                backoff_ms: Some(10),
            },
        );

        let orders = config.policy_for("orders");
        assert_eq!(orders.max_retries, 1);
        assert_eq!(orders.backoff, Duration::from_millis(10));
        assert_eq!(orders.timeout, Duration::from_secs(5));

        let other = config.policy_for("users");
        assert_eq!(other, RetryPolicy::default());
    }

    #[test]
    fn execution_deadline_is_off_by_default() {
        assert_eq!(ResilienceConfig::default().execution_deadline_seconds, None);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let mut config = ResilienceConfig::default();
        config.service_retries.insert(
            "orders".into(),
            ServiceRetryOverride {
                max_retries: Some(7),
                backoff_ms: None,
            },
        );
        let policy = config.policy_for("orders");
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.backoff, Duration::from_millis(100));
    }
}
