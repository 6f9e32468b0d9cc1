pub use crate::errors::AuthError;
pub use crate::quota::{
    QuotaConfig, QuotaDecision, QuotaKeeper, QuotaService, QuotaUsage, RemoteQuotaStore,
};
pub use crate::verifier::{JwtConfig, JwtVerifier, StaticTokenVerifier, TokenVerifier};
