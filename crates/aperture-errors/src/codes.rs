use crate::category::ErrorCategory;
use crate::model::ErrorCode;

pub const SCHEMA_VALIDATION: ErrorCode = ErrorCode("schema.validation");
pub const AUTH_UNAUTHENTICATED: ErrorCode = ErrorCode("auth.unauthenticated");
pub const AUTH_FORBIDDEN: ErrorCode = ErrorCode("auth.forbidden");
pub const GUARD_PROMPT_INJECTION: ErrorCode = ErrorCode("guard.prompt_injection");
pub const GUARD_SENSITIVE_OPERATION: ErrorCode = ErrorCode("guard.sensitive_operation");
pub const QUOTA_RATE_LIMITED: ErrorCode = ErrorCode("quota.rate_limited");
pub const DOWNSTREAM_TRANSIENT: ErrorCode = ErrorCode("downstream.transient");
pub const DOWNSTREAM_PERMANENT: ErrorCode = ErrorCode("downstream.permanent");
pub const DOWNSTREAM_UNKNOWN: ErrorCode = ErrorCode("downstream.unknown");
pub const CIRCUIT_OPEN: ErrorCode = ErrorCode("resilience.circuit_open");
pub const TIMEOUT: ErrorCode = ErrorCode("resilience.timeout");
pub const CANCELED: ErrorCode = ErrorCode("exec.canceled");
pub const PLANNER_FAILED: ErrorCode = ErrorCode("plan.generation_failed");
pub const PROVIDER_UNAVAILABLE: ErrorCode = ErrorCode("provider.unavailable");
pub const UNKNOWN_INTERNAL: ErrorCode = ErrorCode("unknown.internal");

/// HTTP status an error code maps to at the gateway surface.
pub fn http_status(code: &ErrorCode) -> u16 {
    match code.0 {
        "schema.validation" => 400,
        "auth.unauthenticated" => 401,
        "auth.forbidden" => 403,
        "guard.prompt_injection" => 400,
        "guard.sensitive_operation" => 400,
        "quota.rate_limited" => 429,
        "downstream.transient" => 503,
        "downstream.permanent" => 502,
        "downstream.unknown" => 502,
        "resilience.circuit_open" => 503,
        "resilience.timeout" => 408,
        "exec.canceled" => 408,
        "plan.generation_failed" => 500,
        "provider.unavailable" => 503,
        _ => 500,
    }
}

/// Default retry classification carried by an error code.
pub fn default_category(code: &ErrorCode) -> ErrorCategory {
    match code.0 {
        "downstream.transient" | "resilience.circuit_open" | "resilience.timeout"
        | "provider.unavailable" | "quota.rate_limited" => ErrorCategory::Transient,
        "schema.validation" | "auth.unauthenticated" | "auth.forbidden"
        | "guard.prompt_injection" | "guard.sensitive_operation" | "downstream.permanent" => {
            ErrorCategory::Permanent
        }
        _ => ErrorCategory::Unknown,
    }
}
