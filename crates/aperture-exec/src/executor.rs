use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use aperture_errors::prelude::ErrorCategory;
use aperture_net::prelude::{NetError, ServiceClient};
use aperture_plan::prelude::{
    resolve_parameters, ExecutionContext, RetryAttempt, Step, StepError, StepResult,
};
use aperture_resilience::prelude::{BreakerTable, ResilienceConfig, RetryPolicy};

/// Runs one step: resolves its parameters, consults the service's breaker,
/// invokes the downstream operation under the retry/timeout policy, applies
/// the fallback, and appends the result to the execution context.
pub struct StepExecutor {
    client: Arc<dyn ServiceClient>,
    breakers: Arc<BreakerTable>,
    resilience: ResilienceConfig,
}

#[derive(Clone, Debug)]
struct AttemptFailure {
    message: String,
    category: ErrorCategory,
    http_status: Option<u16>,
}

impl AttemptFailure {
    fn breaker_open(service: &str) -> Self {
        Self {
            message: format!("circuit breaker open for {service}: service temporarily unavailable"),
            category: ErrorCategory::Transient,
            http_status: None,
        }
    }

    fn timeout(service: &str, budget: Duration) -> Self {
        Self {
            message: format!(
                "timeout: call to {service} exceeded {} ms",
                budget.as_millis()
            ),
            category: ErrorCategory::Transient,
            http_status: None,
        }
    }

    fn canceled() -> Self {
        Self {
            message: "execution canceled by client".to_string(),
            category: ErrorCategory::Unknown,
            http_status: None,
        }
    }

    fn from_net(err: NetError) -> Self {
        Self {
            category: err.category(),
            http_status: err.source_status(),
            message: err.message().to_string(),
        }
    }
}

impl StepExecutor {
    pub fn new(
        client: Arc<dyn ServiceClient>,
        breakers: Arc<BreakerTable>,
        resilience: ResilienceConfig,
    ) -> Self {
        Self {
            client,
            breakers,
            resilience,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerTable> {
        &self.breakers
    }

    /// Whole-execution time budget, when configured.
    pub fn execution_deadline(&self) -> Option<Duration> {
        self.resilience
            .execution_deadline_seconds
            .map(Duration::from_secs)
    }

    pub async fn execute(
        &self,
        step: &Step,
        cx: &mut ExecutionContext,
        bearer: &str,
        correlation_id: &str,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started = Instant::now();
        let policy = self.resilience.policy_for(&step.service_name);
        let mut budget = policy.timeout;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(started);
            if remaining < budget {
                budget = remaining;
            }
        }
        tracing::debug!(
            target: "aperture::exec",
            correlation_id,
            order = step.order,
            service = %step.service_name,
            function = %step.function_name,
            "step start"
        );

        let parameters = match resolve_parameters(&step.parameters, cx, step.order, cancel) {
            Ok(parameters) => parameters,
            Err(err) => {
                let obj = err.into_inner();
                let failure = AttemptFailure {
                    message: obj.message().to_string(),
                    category: obj.category,
                    http_status: None,
                };
                let result = self.conclude(step, failure, Vec::new(), started);
                cx.push(result.clone());
                return result;
            }
        };

        let mut history: Vec<RetryAttempt> = Vec::new();
        // Set while a downstream call is in flight and not yet settled
        // against the breaker; failed attempts settle before the backoff
        // sleep, so a budget expiring mid-sleep owes the breaker nothing.
        let call_in_flight = AtomicBool::new(false);
        let attempts = self.attempts(
            step,
            &parameters,
            bearer,
            &policy,
            &mut history,
            &call_in_flight,
            cancel,
        );
        let outcome = match tokio::time::timeout(budget, attempts).await {
            Ok(inner) => inner,
            Err(_) => {
                if call_in_flight.load(Ordering::Relaxed) {
                    self.breakers.on_failure(&step.service_name);
                }
                Err(AttemptFailure::timeout(&step.service_name, budget))
            }
        };

        let result = match outcome {
            Ok(value) => StepResult {
                order: step.order,
                service_name: step.service_name.clone(),
                function_name: step.function_name.clone(),
                success: true,
                value: Some(value),
                error: None,
                duration_ms: started.elapsed().as_millis() as u64,
                retry_count: history.len() as u32,
                used_fallback: false,
                error_category: None,
            },
            Err(failure) => self.conclude(step, failure, history, started),
        };

        cx.push(result.clone());
        result
    }

    /// The attempt loop, not yet bounded by the policy timeout. Breaker
    /// admission is re-checked per attempt so that retries against an Open
    /// breaker fail fast without a downstream call.
    #[allow(clippy::too_many_arguments)]
    async fn attempts(
        &self,
        step: &Step,
        parameters: &serde_json::Map<String, Value>,
        bearer: &str,
        policy: &RetryPolicy,
        history: &mut Vec<RetryAttempt>,
        call_in_flight: &AtomicBool,
        cancel: &CancellationToken,
    ) -> Result<Value, AttemptFailure> {
        loop {
            if cancel.is_cancelled() {
                return Err(AttemptFailure::canceled());
            }

            let failure = if !self.breakers.admit(&step.service_name) {
                AttemptFailure::breaker_open(&step.service_name)
            } else {
                call_in_flight.store(true, Ordering::Relaxed);
                let outcome = self
                    .client
                    .call(&step.service_name, &step.function_name, parameters, bearer)
                    .await;
                match outcome {
                    Ok(value) => {
                        call_in_flight.store(false, Ordering::Relaxed);
                        self.breakers.on_success(&step.service_name);
                        return Ok(value);
                    }
                    Err(err) => {
                        self.breakers.on_failure(&step.service_name);
                        call_in_flight.store(false, Ordering::Relaxed);
                        AttemptFailure::from_net(err)
                    }
                }
            };

            let retries_done = history.len() as u32;
            if failure.category != ErrorCategory::Transient || retries_done >= policy.max_retries {
                return Err(failure);
            }

            let retry_number = retries_done + 1;
            let wait = policy.delay_before(retry_number);
            tracing::debug!(
                target: "aperture::exec",
                service = %step.service_name,
                retry = retry_number,
                wait_ms = wait.as_millis() as u64,
                "retrying after transient failure: {}",
                failure.message
            );
            history.push(RetryAttempt {
                attempt_number: retry_number,
                timestamp: Utc::now(),
                error_message: failure.message.clone(),
                wait_before_retry_ms: wait.as_millis() as u64,
                http_status: failure.http_status,
            });

            tokio::select! {
                _ = cancel.cancelled() => return Err(AttemptFailure::canceled()),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Final bookkeeping for a failed step: a configured fallback turns it
    /// into a logical success so later steps can keep piping data.
    fn conclude(
        &self,
        step: &Step,
        failure: AttemptFailure,
        history: Vec<RetryAttempt>,
        started: Instant,
    ) -> StepResult {
        let retry_count = history.len() as u32;
        let used_fallback = step.fallback_value.is_some();
        let error = StepError {
            message: failure.message,
            category: failure.category,
            retry_attempts: retry_count,
            retry_history: history,
            http_status: failure.http_status,
            used_fallback,
            fallback_value: step.fallback_value.clone(),
        };

        match &step.fallback_value {
            Some(fallback) => {
                tracing::info!(
                    target: "aperture::exec",
                    order = step.order,
                    service = %step.service_name,
                    "step failed, using fallback value"
                );
                StepResult {
                    order: step.order,
                    service_name: step.service_name.clone(),
                    function_name: step.function_name.clone(),
                    success: true,
                    value: Some(fallback.clone()),
                    error: Some(error),
                    duration_ms: started.elapsed().as_millis() as u64,
                    retry_count,
                    used_fallback: true,
                    error_category: Some(failure.category),
                }
            }
            None => StepResult {
                order: step.order,
                service_name: step.service_name.clone(),
                function_name: step.function_name.clone(),
                success: false,
                value: None,
                error: Some(error),
                duration_ms: started.elapsed().as_millis() as u64,
                retry_count,
                used_fallback: false,
                error_category: Some(failure.category),
            },
        }
    }
}
