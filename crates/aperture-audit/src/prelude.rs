pub use crate::errors::AuditError;
pub use crate::model::{AuditAction, AuditEntry, AuditRecord};
pub use crate::sink::{AuditSink, MemoryAuditSink};
