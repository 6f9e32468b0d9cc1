use aperture_errors::prelude::*;
use aperture_plan::prelude::PlanError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct ExecError(pub Box<ErrorObj>);

impl ExecError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn message(&self) -> &str {
        self.0.message()
    }

    pub fn internal(msg: &str) -> Self {
        ExecError(Box::new(
            ErrorBuilder::new(codes::UNKNOWN_INTERNAL)
                .user_msg("Intent execution failed.")
                .dev_msg(msg)
                .build(),
        ))
    }
}

impl From<PlanError> for ExecError {
    fn from(err: PlanError) -> Self {
        ExecError(Box::new(err.into_inner()))
    }
}
