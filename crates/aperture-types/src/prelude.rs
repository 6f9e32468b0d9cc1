pub use crate::id::{CorrelationId, Id, TraceId};
pub use crate::principal::Principal;
pub use crate::time::{now_ms, Timestamp};
