use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use aperture_errors::prelude::ErrorCategory;

use crate::errors::PlanError;

/// An ordered, immutable realization of an intent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub intent: String,
    pub steps: Vec<Step>,
}

impl Plan {
    /// Step orders must form `1..=N` with no duplicates or gaps.
    pub fn validate(&self) -> Result<(), PlanError> {
        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.order != expected {
                return Err(PlanError::invalid(&format!(
                    "step order {} at position {index}, expected {expected}",
                    step.order
                )));
            }
        }
        Ok(())
    }
}

/// One downstream operation: a named function on a named service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub order: u32,
    pub service_name: String,
    pub function_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_value: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub error_message: String,
    pub wait_before_retry_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    pub message: String,
    pub category: ErrorCategory,
    pub retry_attempts: u32,
    #[serde(default)]
    pub retry_history: Vec<RetryAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub used_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_value: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub order: u32,
    pub service_name: String,
    pub function_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration_ms: u64,
    pub retry_count: u32,
    #[serde(default)]
    pub used_fallback: bool,
    /// Absent on a clean success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub plan_id: String,
    pub intent: String,
    pub success: bool,
    pub aggregated_result: Value,
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub total_duration_ms: u64,
    pub executed_at: DateTime<Utc>,
    pub correlation_id: String,
}

/// The resolver's lookup environment for one execution. Never shared across
/// requests; appended to only by the owning orchestrator.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub user_id: String,
    pub intent: String,
    pub step_results: Vec<StepResult>,
    pub variables: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(user_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            intent: intent.into(),
            step_results: Vec::new(),
            variables: Map::new(),
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn result_for(&self, order: u32) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.order == order)
    }

    pub fn push(&mut self, result: StepResult) {
        self.step_results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(order: u32) -> Step {
        Step {
            order,
            service_name: "UserService".into(),
            function_name: "GetUser".into(),
            description: String::new(),
            parameters: Map::new(),
            fallback_value: None,
        }
    }

    #[test]
    fn validate_accepts_gap_free_orders() {
        let plan = Plan {
            id: "p1".into(),
            intent: "demo".into(),
            steps: vec![step(1), step(2), step(3)],
        };
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn validate_rejects_gaps_and_duplicates() {
        let gapped = Plan {
            id: "p1".into(),
            intent: "demo".into(),
            steps: vec![step(1), step(3)],
        };
        assert!(gapped.validate().is_err());

        let duplicated = Plan {
            id: "p2".into(),
            intent: "demo".into(),
            steps: vec![step(1), step(1)],
        };
        assert!(duplicated.validate().is_err());
    }

    #[test]
    fn wire_shape_uses_camel_case() {
        let plan = Plan {
            id: "p1".into(),
            intent: "demo".into(),
            steps: vec![Step {
                fallback_value: Some(json!({"role": "guest"})),
                ..step(1)
            }],
        };
        let value = serde_json::to_value(&plan).expect("encode");
        assert_eq!(value["steps"][0]["serviceName"], "UserService");
        assert_eq!(value["steps"][0]["fallbackValue"]["role"], "guest");
    }
}
