use aperture_errors::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct PlanError(pub Box<ErrorObj>);

impl PlanError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn invalid(msg: &str) -> Self {
        PlanError(Box::new(
            ErrorBuilder::new(codes::SCHEMA_VALIDATION)
                .user_msg("Plan failed validation.")
                .dev_msg(msg)
                .build(),
        ))
    }

    pub fn generation(msg: &str) -> Self {
        PlanError(Box::new(
            ErrorBuilder::new(codes::PLANNER_FAILED)
                .user_msg("The planner could not produce a plan for this intent.")
                .dev_msg(msg)
                .build(),
        ))
    }

    pub fn canceled() -> Self {
        PlanError(Box::new(
            ErrorBuilder::new(codes::CANCELED)
                .user_msg("Execution was canceled.")
                .build(),
        ))
    }
}
