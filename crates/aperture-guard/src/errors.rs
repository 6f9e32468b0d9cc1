use aperture_errors::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct GuardError(pub Box<ErrorObj>);

impl GuardError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn code(&self) -> ErrorCode {
        self.0.code
    }

    pub fn invalid(msg: &str) -> Self {
        GuardError(Box::new(
            ErrorBuilder::new(codes::SCHEMA_VALIDATION)
                .user_msg("Request failed validation.")
                .dev_msg(msg)
                .build(),
        ))
    }

    pub fn prompt_injection(detail: &str) -> Self {
        GuardError(Box::new(
            ErrorBuilder::new(codes::GUARD_PROMPT_INJECTION)
                .user_msg("Intent was rejected by the prompt-injection guard.")
                .dev_msg(detail)
                .build(),
        ))
    }

    pub fn sensitive_operation(detail: &str) -> Self {
        GuardError(Box::new(
            ErrorBuilder::new(codes::GUARD_SENSITIVE_OPERATION)
                .user_msg("Intent names a restricted operation.")
                .dev_msg(detail)
                .build(),
        ))
    }
}
