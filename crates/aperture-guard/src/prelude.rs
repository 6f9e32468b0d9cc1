pub use crate::errors::GuardError;
pub use crate::guardrail::Guardrail;
