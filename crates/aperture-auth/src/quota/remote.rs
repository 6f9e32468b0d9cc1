use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::AuthError;
use crate::quota::{QuotaConfig, QuotaDecision, QuotaKeeper, QuotaUsage};

/// Optional distributed quota backend. Failures never refuse admission by
/// themselves; the caller falls back to the in-process keeper.
#[async_trait]
pub trait RemoteQuotaStore: Send + Sync {
    async fn increment_and_check(&self, user_id: &str) -> Result<QuotaDecision, AuthError>;
    async fn usage(&self, user_id: &str) -> Result<Option<QuotaUsage>, AuthError>;
    async fn reset(&self, user_id: &str) -> Result<(), AuthError>;
}

/// Quota front door: prefers the remote store when one is configured and
/// falls back to the in-process keeper per user on backend error.
pub struct QuotaService {
    remote: Option<Arc<dyn RemoteQuotaStore>>,
    local: QuotaKeeper,
}

impl QuotaService {
    pub fn in_process(config: QuotaConfig) -> Self {
        Self {
            remote: None,
            local: QuotaKeeper::new(config),
        }
    }

    pub fn with_remote(config: QuotaConfig, remote: Arc<dyn RemoteQuotaStore>) -> Self {
        Self {
            remote: Some(remote),
            local: QuotaKeeper::new(config),
        }
    }

    pub async fn check(&self, user_id: &str) -> QuotaDecision {
        if let Some(remote) = &self.remote {
            match remote.increment_and_check(user_id).await {
                Ok(decision) => return decision,
                Err(err) => {
                    tracing::warn!(
                        target: "aperture::auth",
                        user_id,
                        "remote quota store failed, using in-process quota: {err}"
                    );
                }
            }
        }
        self.local.check(user_id)
    }

    pub async fn usage(&self, user_id: &str) -> Option<QuotaUsage> {
        if let Some(remote) = &self.remote {
            if let Ok(usage) = remote.usage(user_id).await {
                return usage;
            }
        }
        self.local.usage(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    #[async_trait]
    impl RemoteQuotaStore for FailingStore {
        async fn increment_and_check(&self, _user_id: &str) -> Result<QuotaDecision, AuthError> {
            Err(AuthError::provider_unavailable("remote store down"))
        }

        async fn usage(&self, _user_id: &str) -> Result<Option<QuotaUsage>, AuthError> {
            Err(AuthError::provider_unavailable("remote store down"))
        }

        async fn reset(&self, _user_id: &str) -> Result<(), AuthError> {
            Err(AuthError::provider_unavailable("remote store down"))
        }
    }

    #[tokio::test]
    async fn falls_back_to_local_on_remote_error() {
        let service = QuotaService::with_remote(
            QuotaConfig {
                daily_limit: 1,
                enabled: true,
            },
            Arc::new(FailingStore),
        );
        assert!(service.check("u1").await.allowed);
        assert!(!service.check("u1").await.allowed);
    }

    #[tokio::test]
    async fn in_process_service_enforces_limit() {
        let service = QuotaService::in_process(QuotaConfig {
            daily_limit: 2,
            enabled: true,
        });
        assert!(service.check("u1").await.allowed);
        assert!(service.check("u1").await.allowed);
        assert!(!service.check("u1").await.allowed);
    }
}
