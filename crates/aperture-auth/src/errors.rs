use aperture_errors::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct AuthError(pub Box<ErrorObj>);

impl AuthError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn unauthenticated(msg: &str) -> Self {
        AuthError(Box::new(
            ErrorBuilder::new(codes::AUTH_UNAUTHENTICATED)
                .user_msg("Authentication failed.")
                .dev_msg(msg)
                .build(),
        ))
    }

    pub fn forbidden(msg: &str) -> Self {
        AuthError(Box::new(
            ErrorBuilder::new(codes::AUTH_FORBIDDEN)
                .user_msg("Access denied.")
                .dev_msg(msg)
                .build(),
        ))
    }

    pub fn provider_unavailable(msg: &str) -> Self {
        AuthError(Box::new(
            ErrorBuilder::new(codes::PROVIDER_UNAVAILABLE)
                .user_msg("Authentication backend is unavailable.")
                .dev_msg(msg)
                .build(),
        ))
    }
}
