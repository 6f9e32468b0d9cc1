use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

pub mod remote;

pub use remote::{QuotaService, RemoteQuotaStore};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct QuotaConfig {
    #[serde(default = "QuotaConfig::default_daily_limit")]
    pub daily_limit: u64,
    #[serde(default = "QuotaConfig::default_enabled")]
    pub enabled: bool,
}

impl QuotaConfig {
    fn default_daily_limit() -> u64 {
        1_000
    }

    fn default_enabled() -> bool {
        true
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: Self::default_daily_limit(),
            enabled: Self::default_enabled(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window resets; meaningful on denial.
    pub retry_after_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub used: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
struct QuotaEntry {
    used: u64,
    reset_at: DateTime<Utc>,
}

/// Per-user rolling daily counter. The counter is consumed only on an
/// allowed admission; denials leave it untouched.
pub struct QuotaKeeper {
    entries: RwLock<HashMap<String, Arc<Mutex<QuotaEntry>>>>,
    config: QuotaConfig,
}

impl QuotaKeeper {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn entry(&self, user_id: &str) -> Arc<Mutex<QuotaEntry>> {
        if let Some(entry) = self.entries.read().get(user_id) {
            return entry.clone();
        }
        self.entries
            .write()
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(QuotaEntry {
                    used: 0,
                    reset_at: Utc::now() + ChronoDuration::hours(24),
                }))
            })
            .clone()
    }

    pub fn check(&self, user_id: &str) -> QuotaDecision {
        let now = Utc::now();
        if !self.config.enabled {
            return QuotaDecision {
                allowed: true,
                limit: self.config.daily_limit,
                remaining: self.config.daily_limit,
                reset_at: now + ChronoDuration::hours(24),
                retry_after_secs: 0,
            };
        }

        let entry = self.entry(user_id);
        let mut guard = entry.lock();
        if now >= guard.reset_at {
            guard.used = 0;
            guard.reset_at = now + ChronoDuration::hours(24);
        }

        let limit = self.config.daily_limit;
        if guard.used >= limit {
            let retry_after = (guard.reset_at - now).num_seconds().max(1) as u64;
            return QuotaDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: guard.reset_at,
                retry_after_secs: retry_after,
            };
        }

        guard.used += 1;
        QuotaDecision {
            allowed: true,
            limit,
            remaining: limit - guard.used,
            reset_at: guard.reset_at,
            retry_after_secs: 0,
        }
    }

    pub fn usage(&self, user_id: &str) -> Option<QuotaUsage> {
        let entries = self.entries.read();
        let entry = entries.get(user_id)?;
        let guard = entry.lock();
        Some(QuotaUsage {
            used: guard.used,
            limit: self.config.daily_limit,
            reset_at: guard.reset_at,
        })
    }

    pub fn reset(&self, user_id: &str) {
        if let Some(entry) = self.entries.read().get(user_id) {
            let mut guard = entry.lock();
            guard.used = 0;
            guard.reset_at = Utc::now() + ChronoDuration::hours(24);
        }
    }

    #[cfg(test)]
    fn force_reset_at(&self, user_id: &str, when: DateTime<Utc>) {
        if let Some(entry) = self.entries.read().get(user_id) {
            entry.lock().reset_at = when;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keeper(limit: u64) -> QuotaKeeper {
        QuotaKeeper::new(QuotaConfig {
            daily_limit: limit,
            enabled: true,
        })
    }

    #[test]
    fn allows_until_limit_then_denies_with_retry_after() {
        let keeper = keeper(3);
        for _ in 0..3 {
            let decision = keeper.check("u1");
            assert!(decision.allowed);
        }
        let denied = keeper.check("u1");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_secs >= 1);
        assert!(denied.retry_after_secs <= 86_400);
    }

    #[test]
    fn denial_does_not_consume_quota() {
        let keeper = keeper(1);
        assert!(keeper.check("u1").allowed);
        assert!(!keeper.check("u1").allowed);
        assert!(!keeper.check("u1").allowed);
        let usage = keeper.usage("u1").expect("usage");
        assert_eq!(usage.used, 1);
    }

    #[test]
    fn users_are_independent() {
        let keeper = keeper(1);
        assert!(keeper.check("u1").allowed);
        assert!(keeper.check("u2").allowed);
        assert!(!keeper.check("u1").allowed);
    }

    #[test]
    fn window_rollover_resets_usage() {
        let keeper = keeper(1);
        assert!(keeper.check("u1").allowed);
        keeper.force_reset_at("u1", Utc::now() - ChronoDuration::seconds(1));
        let decision = keeper.check("u1");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn manual_reset_clears_usage() {
        let keeper = keeper(1);
        assert!(keeper.check("u1").allowed);
        keeper.reset("u1");
        assert!(keeper.check("u1").allowed);
    }

    #[test]
    fn disabled_quota_always_allows() {
        let keeper = QuotaKeeper::new(QuotaConfig {
            daily_limit: 1,
            enabled: false,
        });
        for _ in 0..5 {
            assert!(keeper.check("u1").allowed);
        }
    }
}
