use aperture_errors::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct CacheError(pub Box<ErrorObj>);

impl CacheError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn codec(msg: &str) -> Self {
        CacheError(Box::new(
            ErrorBuilder::new(codes::UNKNOWN_INTERNAL)
                .user_msg("Cache payload could not be serialized.")
                .dev_msg(msg)
                .build(),
        ))
    }
}
