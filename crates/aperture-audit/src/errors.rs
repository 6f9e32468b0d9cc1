use aperture_errors::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct AuditError(pub Box<ErrorObj>);

impl AuditError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn sink(msg: &str) -> Self {
        AuditError(Box::new(
            ErrorBuilder::new(codes::UNKNOWN_INTERNAL)
                .user_msg("Audit record could not be written.")
                .dev_msg(msg)
                .build(),
        ))
    }
}
