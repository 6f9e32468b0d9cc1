use aperture_errors::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0:?}")]
pub struct NetError(pub Box<ErrorObj>);

impl NetError {
    pub fn into_inner(self) -> ErrorObj {
        *self.0
    }

    pub fn category(&self) -> ErrorCategory {
        self.0.category
    }

    pub fn source_status(&self) -> Option<u16> {
        self.0.source_status
    }

    pub fn message(&self) -> &str {
        self.0.message()
    }

    pub fn unknown_service(service: &str) -> Self {
        NetError(Box::new(
            ErrorBuilder::new(codes::SCHEMA_VALIDATION)
                .user_msg("Requested service is not configured.")
                .dev_msg(format!("no endpoint configured for service {service}"))
                .build(),
        ))
    }

    pub fn invalid_endpoint(service: &str, detail: &str) -> Self {
        NetError(Box::new(
            ErrorBuilder::new(codes::SCHEMA_VALIDATION)
                .user_msg("Service endpoint configuration is invalid.")
                .dev_msg(format!("endpoint for {service}: {detail}"))
                .build(),
        ))
    }

    /// Transport-level failure (connect, timeout, DNS). Classified from the
    /// message text.
    pub fn transport(detail: &str) -> Self {
        let category = categorize(detail, None);
        NetError(Box::new(
            ErrorBuilder::new(code_for(category))
                .category(category)
                .user_msg("Downstream service could not be reached.")
                .dev_msg(detail)
                .build(),
        ))
    }

    /// Non-success HTTP status from a downstream service. Classified from
    /// the status and the body text.
    pub fn upstream_status(status: u16, detail: &str) -> Self {
        let category = categorize(detail, Some(status));
        NetError(Box::new(
            ErrorBuilder::new(code_for(category))
                .category(category)
                .user_msg("Downstream service rejected the call.")
                .dev_msg(detail)
                .source_status(status)
                .build(),
        ))
    }

    pub fn decode(detail: &str) -> Self {
        NetError(Box::new(
            ErrorBuilder::new(codes::DOWNSTREAM_UNKNOWN)
                .user_msg("Downstream response could not be decoded.")
                .dev_msg(detail)
                .build(),
        ))
    }
}

fn code_for(category: ErrorCategory) -> ErrorCode {
    match category {
        ErrorCategory::Transient => codes::DOWNSTREAM_TRANSIENT,
        ErrorCategory::Permanent => codes::DOWNSTREAM_PERMANENT,
        ErrorCategory::Unknown => codes::DOWNSTREAM_UNKNOWN,
    }
}
