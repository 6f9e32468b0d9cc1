pub use crate::category::{categorize, ErrorCategory};
pub use crate::codes;
pub use crate::model::{ErrorBuilder, ErrorCode, ErrorObj};
