use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use aperture_types::prelude::Principal;

use crate::errors::AuthError;
use crate::verifier::TokenVerifier;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub secret_key: String,
    #[serde(default = "JwtConfig::default_roles_claim")]
    pub roles_claim: String,
}

impl JwtConfig {
    fn default_roles_claim() -> String {
        "roles".to_string()
    }
}

/// HS256 bearer verification against a shared secret, with issuer and
/// audience validation. The user id comes from `sub`, falling back to `oid`.
pub struct JwtVerifier {
    config: JwtConfig,
    key: DecodingKey,
}

impl JwtVerifier {
    pub fn new(config: JwtConfig) -> Self {
        let key = DecodingKey::from_secret(config.secret_key.as_bytes());
        Self { config, key }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        validation.validate_exp = true;
        validation.set_issuer(std::slice::from_ref(&self.config.issuer));
        validation.set_audience(std::slice::from_ref(&self.config.audience));
        validation
    }

    fn user_id(claims: &Map<String, Value>) -> Result<String, AuthError> {
        for claim in ["sub", "oid"] {
            match claims.get(claim) {
                Some(Value::String(s)) if !s.is_empty() => return Ok(s.clone()),
                Some(Value::Number(n)) => return Ok(n.to_string()),
                _ => {}
            }
        }
        Err(AuthError::unauthenticated("no subject claim (sub/oid)"))
    }

    fn roles(&self, claims: &Map<String, Value>) -> Vec<String> {
        match claims.get(&self.config.roles_claim) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, bearer: &str) -> Result<Principal, AuthError> {
        let data = jsonwebtoken::decode::<Value>(bearer, &self.key, &self.validation())
            .map_err(|err| AuthError::unauthenticated(&format!("jwt verification failed: {err}")))?;

        let claims = match data.claims {
            Value::Object(map) => map,
            _ => return Err(AuthError::unauthenticated("jwt claims must be an object")),
        };

        let user_id = Self::user_id(&claims)?;
        let roles = self.roles(&claims);
        Ok(Principal::with_roles(user_id, roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "unit-test-secret";

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(JwtConfig {
            issuer: "https://issuer.example".into(),
            audience: "api://aperture".into(),
            secret_key: SECRET.into(),
            roles_claim: "roles".into(),
        })
    }

    fn token(claims: Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("encode jwt")
    }

    fn unix_now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[tokio::test]
    async fn verifies_valid_token() {
        let bearer = token(json!({
            "sub": "user-123",
            "iss": "https://issuer.example",
            "aud": "api://aperture",
            "exp": unix_now() + 600,
            "roles": ["admin", "dev"],
        }));
        let principal = verifier().verify(&bearer).await.expect("verify");
        assert_eq!(principal.user_id, "user-123");
        assert!(principal.has_role("admin"));
        assert!(principal.has_role("dev"));
    }

    #[tokio::test]
    async fn falls_back_to_oid_claim() {
        let bearer = token(json!({
            "oid": "object-9",
            "iss": "https://issuer.example",
            "aud": "api://aperture",
            "exp": unix_now() + 600,
        }));
        let principal = verifier().verify(&bearer).await.expect("verify");
        assert_eq!(principal.user_id, "object-9");
    }

    #[tokio::test]
    async fn rejects_wrong_issuer() {
        let bearer = token(json!({
            "sub": "user-123",
            "iss": "https://other.example",
            "aud": "api://aperture",
            "exp": unix_now() + 600,
        }));
        assert!(verifier().verify(&bearer).await.is_err());
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let bearer = token(json!({
            "sub": "user-123",
            "iss": "https://issuer.example",
            "aud": "api://aperture",
            "exp": unix_now() - 600,
        }));
        assert!(verifier().verify(&bearer).await.is_err());
    }

    #[tokio::test]
    async fn rejects_missing_subject() {
        let bearer = token(json!({
            "iss": "https://issuer.example",
            "aud": "api://aperture",
            "exp": unix_now() + 600,
        }));
        assert!(verifier().verify(&bearer).await.is_err());
    }

    #[tokio::test]
    async fn string_role_claim_becomes_single_role() {
        let bearer = token(json!({
            "sub": "user-123",
            "iss": "https://issuer.example",
            "aud": "api://aperture",
            "exp": unix_now() + 600,
            "roles": "admin",
        }));
        let principal = verifier().verify(&bearer).await.expect("verify");
        assert_eq!(principal.roles.len(), 1);
        assert!(principal.has_role("admin"));
    }
}
