pub use crate::errors::PlanError;
pub use crate::fingerprint::plan_fingerprint;
pub use crate::model::{
    ExecutionContext, ExecutionResult, Plan, RetryAttempt, Step, StepError, StepResult,
};
pub use crate::planner::{Planner, PlannerRoute, RulePlanner};
pub use crate::resolver::resolve_parameters;
