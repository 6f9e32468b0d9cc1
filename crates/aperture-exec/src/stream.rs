use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use aperture_types::prelude::{CorrelationId, Principal};

use crate::events::StreamEvent;
use crate::orchestrator::Orchestrator;

/// Event outlet bound to one streaming execution. A dropped consumer turns
/// into cancellation, which the executor observes between attempts.
#[derive(Clone)]
pub struct EventSender {
    tx: UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
}

impl EventSender {
    pub fn new(tx: UnboundedSender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    pub fn emit(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(target: "aperture::exec", "event consumer gone, canceling execution");
            self.cancel.cancel();
        }
    }
}

/// Wraps the orchestrator to emit the typed event sequence of an execution.
pub struct StreamingAdapter {
    orchestrator: Arc<Orchestrator>,
}

impl StreamingAdapter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Starts the execution on a background task and returns the event
    /// receiver plus the token that cancels the run.
    pub fn stream(
        &self,
        principal: Principal,
        intent: String,
        bearer: String,
        correlation_id: CorrelationId,
        variables: serde_json::Map<String, serde_json::Value>,
    ) -> (UnboundedReceiver<StreamEvent>, CancellationToken) {
        let (tx, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        let sender = EventSender::new(tx, cancel.clone());
        let orchestrator = self.orchestrator.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let outcome = orchestrator
                .execute(
                    &principal,
                    &intent,
                    &bearer,
                    &correlation_id,
                    variables,
                    &task_cancel,
                    Some(&sender),
                )
                .await;
            if let Err(err) = outcome {
                tracing::warn!(
                    target: "aperture::exec",
                    correlation_id = %correlation_id.0,
                    "streaming execution failed before running steps: {err}"
                );
            }
        });

        (rx, cancel)
    }
}
