use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    ExecutionStarted,
    PlanGenerated,
    StepStarted,
    StepProgress,
    StepCompleted,
    StepFailed,
    ExecutionCompleted,
    ExecutionFailed,
}

impl StreamEventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamEventType::ExecutionStarted => "execution_started",
            StreamEventType::PlanGenerated => "plan_generated",
            StreamEventType::StepStarted => "step_started",
            StreamEventType::StepProgress => "step_progress",
            StreamEventType::StepCompleted => "step_completed",
            StreamEventType::StepFailed => "step_failed",
            StreamEventType::ExecutionCompleted => "execution_completed",
            StreamEventType::ExecutionFailed => "execution_failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamEventType::ExecutionCompleted | StreamEventType::ExecutionFailed
        )
    }
}

/// One record of the streaming protocol. `step_order` is 0 for
/// execution-level events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub event_type: StreamEventType,
    pub step_order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub correlation_id: String,
}

impl StreamEvent {
    pub fn execution(
        event_type: StreamEventType,
        correlation_id: &str,
        data: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            event_type,
            step_order: 0,
            service_name: None,
            function_name: None,
            data,
            timestamp: Utc::now(),
            duration_ms,
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn step(
        event_type: StreamEventType,
        order: u32,
        service_name: &str,
        function_name: &str,
        correlation_id: &str,
        data: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            event_type,
            step_order: order,
            service_name: Some(service_name.to_string()),
            function_name: Some(function_name.to_string()),
            data,
            timestamp: Utc::now(),
            duration_ms,
            correlation_id: correlation_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_serialize_snake_case() {
        let encoded = serde_json::to_string(&StreamEventType::ExecutionStarted).expect("encode");
        assert_eq!(encoded, "\"execution_started\"");
        assert_eq!(StreamEventType::StepFailed.as_str(), "step_failed");
    }

    #[test]
    fn terminal_detection() {
        assert!(StreamEventType::ExecutionCompleted.is_terminal());
        assert!(StreamEventType::ExecutionFailed.is_terminal());
        assert!(!StreamEventType::StepCompleted.is_terminal());
    }
}
