use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use aperture_audit::prelude::{AuditAction, AuditEntry, AuditSink};
use aperture_cache::prelude::{CacheKey, TtlCache};
use aperture_errors::prelude::ErrorCategory;
use aperture_plan::prelude::{
    plan_fingerprint, ExecutionContext, ExecutionResult, Plan, Planner, Step, StepError,
    StepResult,
};
use aperture_types::prelude::{CorrelationId, Principal};

use crate::errors::ExecError;
use crate::events::{StreamEvent, StreamEventType};
use crate::executor::StepExecutor;
use crate::stream::EventSender;

/// Walks a plan's steps in order, threading results through the execution
/// context, and aggregates the outcome. Plans are cached per
/// (intent, user) fingerprint.
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    executor: StepExecutor,
    plan_cache: Arc<TtlCache>,
    plan_ttl: Duration,
    audit: Arc<dyn AuditSink>,
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: StepExecutor,
        plan_cache: Arc<TtlCache>,
        plan_ttl: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            planner,
            executor,
            plan_cache,
            plan_ttl,
            audit,
        }
    }

    /// Plan lookup shared by the plan-only and execute paths.
    pub async fn plan_for(&self, principal: &Principal, intent: &str) -> Result<Plan, ExecError> {
        let key = CacheKey::new("plan", &plan_fingerprint(intent, &principal.user_id));
        if let Some(plan) = self.plan_cache.get::<Plan>(&key) {
            tracing::debug!(target: "aperture::exec", plan_id = %plan.id, "plan cache hit");
            return Ok(plan);
        }

        let plan = self.planner.plan(intent, principal).await?;
        plan.validate()?;
        if let Err(err) = self.plan_cache.set(&key, &plan, Some(self.plan_ttl)) {
            tracing::warn!(target: "aperture::exec", "plan cache store failed: {err}");
        }
        Ok(plan)
    }

    pub async fn execute(
        &self,
        principal: &Principal,
        intent: &str,
        bearer: &str,
        correlation_id: &CorrelationId,
        variables: serde_json::Map<String, Value>,
        cancel: &CancellationToken,
        events: Option<&EventSender>,
    ) -> Result<ExecutionResult, ExecError> {
        let started = Instant::now();
        let corr = correlation_id.0.as_str();
        emit(
            events,
            StreamEvent::execution(
                StreamEventType::ExecutionStarted,
                corr,
                json!({ "intent": intent, "userId": principal.user_id }),
                0,
            ),
        );

        let plan = match self.plan_for(principal, intent).await {
            Ok(plan) => plan,
            Err(err) => {
                emit(
                    events,
                    StreamEvent::execution(
                        StreamEventType::ExecutionFailed,
                        corr,
                        json!({ "errorType": "planner", "error": err.message() }),
                        started.elapsed().as_millis() as u64,
                    ),
                );
                self.audit_execution(principal, corr, None, false, Some(err.message()), started)
                    .await;
                return Err(err);
            }
        };

        emit(
            events,
            StreamEvent::execution(
                StreamEventType::PlanGenerated,
                corr,
                json!({
                    "planId": plan.id,
                    "stepCount": plan.steps.len(),
                    "steps": plan
                        .steps
                        .iter()
                        .map(|s| json!({
                            "order": s.order,
                            "serviceName": s.service_name,
                            "functionName": s.function_name,
                        }))
                        .collect::<Vec<_>>(),
                }),
                started.elapsed().as_millis() as u64,
            ),
        );

        let mut cx = ExecutionContext::new(principal.user_id.clone(), intent.to_string())
            .with_variables(variables);
        let deadline = self.executor.execution_deadline().map(|d| started + d);
        let mut canceled = false;

        for (index, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                // Every plan step still gets a result, executed or not.
                for skipped in &plan.steps[index..] {
                    cx.push(skipped_result(skipped, CANCELED_SKIP, ErrorCategory::Unknown));
                }
                canceled = true;
                break;
            }

            emit(
                events,
                StreamEvent::step(
                    StreamEventType::StepStarted,
                    step.order,
                    &step.service_name,
                    &step.function_name,
                    corr,
                    json!({ "description": step.description }),
                    0,
                ),
            );

            let result = self
                .executor
                .execute(step, &mut cx, bearer, corr, deadline, cancel)
                .await;

            if result.success {
                emit(
                    events,
                    StreamEvent::step(
                        StreamEventType::StepCompleted,
                        step.order,
                        &step.service_name,
                        &step.function_name,
                        corr,
                        json!({
                            "usedFallback": result.used_fallback,
                            "retryCount": result.retry_count,
                            "value": result.value,
                        }),
                        result.duration_ms,
                    ),
                );
            } else {
                emit(
                    events,
                    StreamEvent::step(
                        StreamEventType::StepFailed,
                        step.order,
                        &step.service_name,
                        &step.function_name,
                        corr,
                        json!({
                            "error": result.error.as_ref().map(|e| e.message.clone()),
                            "errorCategory": result.error_category,
                            "retryCount": result.retry_count,
                        }),
                        result.duration_ms,
                    ),
                );
            }

            if cancel.is_cancelled() && !result.success {
                for skipped in &plan.steps[index + 1..] {
                    cx.push(skipped_result(skipped, CANCELED_SKIP, ErrorCategory::Unknown));
                }
                canceled = true;
                break;
            }

            // A permanent failure with no fallback ahead cannot produce
            // anything for later steps to pipe; stop here.
            if !result.success && result.error_category == Some(ErrorCategory::Permanent) {
                let remaining = &plan.steps[index + 1..];
                if !remaining.iter().any(|s| s.fallback_value.is_some()) {
                    for skipped in remaining {
                        cx.push(skipped_result(skipped, PERMANENT_SKIP, ErrorCategory::Permanent));
                    }
                    break;
                }
            }
        }

        let steps = cx.step_results;
        let all_succeeded = steps.len() == plan.steps.len() && steps.iter().all(|s| s.success);
        let success = all_succeeded && !canceled;

        let error_message = if canceled {
            Some("execution canceled by client".to_string())
        } else {
            steps
                .iter()
                .find(|s| !s.success)
                .and_then(|s| s.error.as_ref())
                .map(|e| e.message.clone())
        };

        let aggregated_result = aggregate(&steps);
        let result = ExecutionResult {
            plan_id: plan.id.clone(),
            intent: intent.to_string(),
            success,
            aggregated_result,
            steps,
            error_message: error_message.clone(),
            total_duration_ms: started.elapsed().as_millis() as u64,
            executed_at: Utc::now(),
            correlation_id: corr.to_string(),
        };

        if success {
            emit(
                events,
                StreamEvent::execution(
                    StreamEventType::ExecutionCompleted,
                    corr,
                    json!({ "planId": plan.id, "stepCount": result.steps.len() }),
                    result.total_duration_ms,
                ),
            );
        } else {
            emit(
                events,
                StreamEvent::execution(
                    StreamEventType::ExecutionFailed,
                    corr,
                    json!({
                        "planId": plan.id,
                        "errorType": if canceled { "canceled" } else { "step_failure" },
                        "error": error_message,
                    }),
                    result.total_duration_ms,
                ),
            );
        }

        self.audit_execution(
            principal,
            corr,
            Some(&plan.id),
            success,
            error_message.as_deref(),
            started,
        )
        .await;

        Ok(result)
    }

    async fn audit_execution(
        &self,
        principal: &Principal,
        correlation_id: &str,
        plan_id: Option<&str>,
        success: bool,
        error_message: Option<&str>,
        started: Instant,
    ) {
        let status_code = if success { 200 } else { 500 };
        let mut entry = AuditEntry::new(
            principal.user_id.clone(),
            AuditAction::Execute,
            "intent:execute",
            "POST",
            status_code,
        )
        .with_correlation_id(correlation_id)
        .with_context(
            "durationMs",
            json!(started.elapsed().as_millis() as u64),
        );
        if let Some(plan_id) = plan_id {
            entry = entry.with_context("planId", json!(plan_id));
        }
        if let Some(message) = error_message {
            entry = entry.with_error(message);
        }
        if let Err(err) = self.audit.record(entry).await {
            tracing::warn!(target: "aperture::exec", "audit record failed: {err}");
        }
    }
}

fn emit(events: Option<&EventSender>, event: StreamEvent) {
    if let Some(sender) = events {
        sender.emit(event);
    }
}

const PERMANENT_SKIP: &str = "not executed: an earlier step failed permanently";
const CANCELED_SKIP: &str = "not executed: execution canceled by client";

/// Result recorded for a step that never ran, so that every plan step has
/// exactly one result in plan order.
fn skipped_result(step: &Step, message: &str, category: ErrorCategory) -> StepResult {
    StepResult {
        order: step.order,
        service_name: step.service_name.clone(),
        function_name: step.function_name.clone(),
        success: false,
        value: None,
        error: Some(StepError {
            message: message.to_string(),
            category,
            retry_attempts: 0,
            retry_history: Vec::new(),
            http_status: None,
            used_fallback: false,
            fallback_value: None,
        }),
        duration_ms: 0,
        retry_count: 0,
        used_fallback: false,
        error_category: Some(category),
    }
}

/// Single-step executions surface the step's value directly; multi-step
/// executions surface a per-step view.
fn aggregate(steps: &[StepResult]) -> Value {
    if steps.len() == 1 {
        return steps[0].value.clone().unwrap_or(Value::Null);
    }
    json!({
        "steps": steps
            .iter()
            .map(|s| json!({
                "order": s.order,
                "serviceName": s.service_name,
                "functionName": s.function_name,
                "success": s.success,
                "result": s.value,
                "error": s.error.as_ref().map(|e| e.message.clone()),
                "durationMs": s.duration_ms,
            }))
            .collect::<Vec<_>>(),
    })
}
