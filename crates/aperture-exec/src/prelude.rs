pub use crate::errors::ExecError;
pub use crate::events::{StreamEvent, StreamEventType};
pub use crate::executor::StepExecutor;
pub use crate::orchestrator::Orchestrator;
pub use crate::stream::{EventSender, StreamingAdapter};
