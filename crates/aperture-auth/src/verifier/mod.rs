use async_trait::async_trait;

use aperture_types::prelude::Principal;

use crate::errors::AuthError;

pub mod jwt;

pub use jwt::{JwtConfig, JwtVerifier};

/// Validates a bearer credential and yields the calling principal.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, bearer: &str) -> Result<Principal, AuthError>;
}

/// Development verifier: accepts `user-id@role1,role2` shaped tokens.
pub struct StaticTokenVerifier;

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, bearer: &str) -> Result<Principal, AuthError> {
        let bearer = bearer.trim();
        if bearer.is_empty() {
            return Err(AuthError::unauthenticated("empty bearer token"));
        }
        match bearer.split_once('@') {
            Some((user, roles)) if !user.is_empty() => Ok(Principal::with_roles(
                user,
                roles.split(',').filter(|r| !r.is_empty()),
            )),
            Some(_) => Err(AuthError::unauthenticated("empty user id in bearer")),
            None => Ok(Principal::new(bearer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_verifier_parses_user_and_roles() {
        let principal = StaticTokenVerifier
            .verify("u1@admin,ops")
            .await
            .expect("verify");
        assert_eq!(principal.user_id, "u1");
        assert!(principal.has_role("admin"));
        assert!(principal.has_role("ops"));
    }

    #[tokio::test]
    async fn static_verifier_accepts_bare_user() {
        let principal = StaticTokenVerifier.verify("u2").await.expect("verify");
        assert_eq!(principal.user_id, "u2");
        assert!(principal.roles.is_empty());
    }

    #[tokio::test]
    async fn static_verifier_rejects_empty() {
        assert!(StaticTokenVerifier.verify("  ").await.is_err());
        assert!(StaticTokenVerifier.verify("@admin").await.is_err());
    }
}
