use serde::Serialize;

use crate::category::ErrorCategory;
use crate::codes;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorCode(pub &'static str);

/// The one error shape every crate-level error newtype wraps. `user_msg` is
/// safe to surface; `dev_msg` stays in logs and dev-facing bodies.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorObj {
    pub code: ErrorCode,
    pub http_status: u16,
    pub category: ErrorCategory,
    pub user_msg: String,
    pub dev_msg: Option<String>,
    /// HTTP status carried by the upstream failure this error reports, when any.
    pub source_status: Option<u16>,
}

impl ErrorObj {
    pub fn message(&self) -> &str {
        self.dev_msg.as_deref().unwrap_or(&self.user_msg)
    }
}

pub struct ErrorBuilder {
    code: ErrorCode,
    http_status: u16,
    category: ErrorCategory,
    user_msg: String,
    dev_msg: Option<String>,
    source_status: Option<u16>,
}

impl ErrorBuilder {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            http_status: codes::http_status(&code),
            category: codes::default_category(&code),
            user_msg: String::new(),
            dev_msg: None,
            source_status: None,
        }
    }

    pub fn user_msg(mut self, msg: impl Into<String>) -> Self {
        self.user_msg = msg.into();
        self
    }

    pub fn dev_msg(mut self, msg: impl Into<String>) -> Self {
        self.dev_msg = Some(msg.into());
        self
    }

    pub fn category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    pub fn source_status(mut self, status: u16) -> Self {
        self.source_status = Some(status);
        self
    }

    pub fn build(self) -> ErrorObj {
        ErrorObj {
            code: self.code,
            http_status: self.http_status,
            category: self.category,
            user_msg: self.user_msg,
            dev_msg: self.dev_msg,
            source_status: self.source_status,
        }
    }
}
