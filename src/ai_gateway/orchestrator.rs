use std::{pin::Pin, sync::Arc};

use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    ai_gateway::{
        error::GatewayError,
        gateway::CompletionGateway,
        telemetry::{GatewayTelemetryEvent, emit_gateway_event},
        types_chat::{GenerationRequest, TextStream},
    },
    directive::{self, Directive, STATE_UPDATE_TAG},
};

/// Aggregate attached to the terminal `done` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DonePayload {
    pub full_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directive: Option<Directive>,
}

/// The ordered contract between the orchestrator and its consumer. Exactly
/// one of `Done` or `Error` ends every run. After a `Retry` the consumer
/// discards the text shown for the abandoned attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Content { text: String },
    Retry { attempt: u32, max_attempts: u32 },
    Done { payload: Option<DonePayload> },
    Error { message: String },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Content { .. } => "content",
            StreamEvent::Retry { .. } => "retry",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// JSON body of the event as delivered on the wire.
    pub fn data(&self) -> Value {
        match self {
            StreamEvent::Content { text } => json!({ "type": "content", "text": text }),
            StreamEvent::Retry {
                attempt,
                max_attempts,
            } => json!({ "type": "retry", "attempt": attempt, "max_retries": max_attempts }),
            StreamEvent::Done { payload } => {
                let mut data = match payload {
                    Some(payload) => serde_json::to_value(payload).unwrap_or_else(|_| json!({})),
                    None => json!({}),
                };
                data["type"] = json!("done");
                data
            }
            StreamEvent::Error { message } => json!({ "type": "error", "error": message }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'static>>;

/// Runs a streaming generation with bounded retries on safety rejections.
#[derive(Clone)]
pub struct RetryOrchestrator {
    gateway: Arc<CompletionGateway>,
}

impl RetryOrchestrator {
    pub fn new(gateway: Arc<CompletionGateway>) -> Self {
        Self { gateway }
    }

    /// Starts the attempt loop in the background. Dropping the returned
    /// stream cancels the in-flight upstream call.
    pub fn run(&self, mut request: GenerationRequest) -> StreamEventStream {
        let request_id = request
            .request_id
            .take()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        request.request_id = Some(request_id.clone());

        let (tx, rx) = mpsc::channel::<StreamEvent>(64);
        let span = tracing::info_span!(
            target: "ai_gateway",
            "retry_orchestrator",
            request_id = %request_id
        );
        tokio::spawn(run_attempts(tx, self.gateway.clone(), request_id, request).instrument(span));

        Box::pin(ReceiverStream::new(rx))
    }
}

async fn run_attempts(
    tx: mpsc::Sender<StreamEvent>,
    gateway: Arc<CompletionGateway>,
    request_id: String,
    request: GenerationRequest,
) {
    let reliability = gateway.reliability().clone();
    let max_attempts = reliability.max_attempts();
    let base_temperature = request.temperature;

    for attempt in 0..max_attempts {
        let temperature = reliability.temperature_for_attempt(base_temperature, attempt);
        emit_gateway_event(GatewayTelemetryEvent::AttemptStarted {
            request_id: request_id.clone(),
            attempt,
            temperature,
        });

        let attempt_request = GenerationRequest {
            temperature,
            ..request.clone()
        };

        let opened = tokio::select! {
            _ = tx.closed() => return,
            opened = gateway.chat_stream(attempt_request) => opened,
        };

        let outcome = match opened {
            Ok(stream) => forward_fragments(&tx, stream).await,
            Err(err) => Err(err),
        };

        let err = match outcome {
            Ok(Some(full_text)) => {
                let directive = tagged_directive(&request_id, &full_text);
                let _ = tx
                    .send(StreamEvent::Done {
                        payload: Some(DonePayload {
                            full_text,
                            directive,
                        }),
                    })
                    .await;
                return;
            }
            Ok(None) => {
                tracing::debug!(
                    target: "ai_gateway",
                    request_id = %request_id,
                    attempt = attempt,
                    "consumer_disconnected"
                );
                return;
            }
            Err(err) => err,
        };

        let will_retry = reliability.can_retry(&err, attempt);
        emit_gateway_event(GatewayTelemetryEvent::AttemptFailed {
            request_id: request_id.clone(),
            attempt,
            kind: err.kind,
            will_retry,
        });

        if will_retry {
            if tx
                .send(StreamEvent::Retry {
                    attempt: attempt + 1,
                    max_attempts,
                })
                .await
                .is_err()
            {
                return;
            }
            continue;
        }

        let message = if err.is_safety_rejection() {
            format!(
                "content was rejected by the safety filter after {} attempts",
                attempt + 1
            )
        } else {
            err.to_string()
        };
        let _ = tx.send(StreamEvent::Error { message }).await;
        return;
    }
}

/// Forwards one attempt's fragments. `Ok(None)` means the consumer went away.
async fn forward_fragments(
    tx: &mpsc::Sender<StreamEvent>,
    mut stream: TextStream,
) -> Result<Option<String>, GatewayError> {
    let mut full_text = String::new();

    loop {
        let item = tokio::select! {
            _ = tx.closed() => return Ok(None),
            item = stream.next() => item,
        };

        match item {
            None => return Ok(Some(full_text)),
            Some(Ok(fragment)) => {
                full_text.push_str(&fragment);
                if tx.send(StreamEvent::Content { text: fragment }).await.is_err() {
                    return Ok(None);
                }
            }
            Some(Err(err)) => return Err(err),
        }
    }
}

fn tagged_directive(request_id: &str, full_text: &str) -> Option<Directive> {
    match directive::extract_tagged(full_text, STATE_UPDATE_TAG)? {
        Ok(directive) => Some(directive),
        Err(err) => {
            tracing::warn!(
                target: "ai_gateway",
                request_id = %request_id,
                error = %err,
                raw = err.raw().unwrap_or_default(),
                "tagged_directive_unreadable"
            );
            None
        }
    }
}
