use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use aperture_types::prelude::Id;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Read,
    Create,
    Update,
    Delete,
    Modify,
    Access,
    Execute,
}

/// What a caller hands to the sink; id and timestamp are assigned on append.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub user_id: String,
    pub action: AuditAction,
    pub resource: String,
    pub method: String,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub correlation_id: Option<String>,
    pub context: Map<String, Value>,
}

impl AuditEntry {
    pub fn new(
        user_id: impl Into<String>,
        action: AuditAction,
        resource: impl Into<String>,
        method: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            action,
            resource: resource.into(),
            method: method.into(),
            status_code,
            error_message: None,
            ip_address: None,
            correlation_id: None,
            context: Map::new(),
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Id,
    pub user_id: String,
    pub action: AuditAction,
    pub resource: String,
    pub method: String,
    pub status_code: u16,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub context: Map<String, Value>,
}

impl AuditRecord {
    /// A response status in [200, 300) counts as success.
    pub fn from_entry(entry: AuditEntry) -> Self {
        let success = (200..300).contains(&entry.status_code);
        Self {
            id: Id::new_random(),
            user_id: entry.user_id,
            action: entry.action,
            resource: entry.resource,
            method: entry.method,
            status_code: entry.status_code,
            success,
            error_message: entry.error_message,
            timestamp: Utc::now(),
            ip_address: entry.ip_address,
            correlation_id: entry.correlation_id,
            context: entry.context,
        }
    }
}
