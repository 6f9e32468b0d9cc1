use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::AuditError;
use crate::model::{AuditEntry, AuditRecord};

/// Append-only audit trail. Implementations must be concurrency-safe;
/// readers always see a consistent prefix of the log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
    async fn by_user(&self, user_id: &str, limit: usize) -> Result<Vec<AuditRecord>, AuditError>;
    async fn by_resource(&self, resource: &str, limit: usize)
        -> Result<Vec<AuditRecord>, AuditError>;
}

/// Default process-lifetime sink.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let record = AuditRecord::from_entry(entry);
        tracing::info!(
            target: "aperture::audit",
            id = %record.id.0,
            user_id = %record.user_id,
            action = ?record.action,
            resource = %record.resource,
            status = record.status_code,
            success = record.success,
            "audit"
        );
        self.records.write().push(record);
        Ok(())
    }

    async fn by_user(&self, user_id: &str, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read();
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn by_resource(
        &self,
        resource: &str,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read();
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.resource == resource)
            .take(limit)
            .cloned()
            .collect())
    }
}
