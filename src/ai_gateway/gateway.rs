use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::{
    ai_gateway::{
        adapters::{AdapterContext, ModelEndpoint, openai_compatible::OpenAiCompatibleAdapter},
        credentials::CredentialProvider,
        error::{
            GatewayError, GatewayErrorKind, empty_response, protocol_violation, safety_rejected,
        },
        reliability::ReliabilityLayer,
        request_normalizer::RequestNormalizer,
        router::EndpointRouter,
        telemetry::{GatewayTelemetryEvent, emit_gateway_event},
        types::AIGatewayConfig,
        types_chat::{
            AdapterCancelHandle, AdapterEventStream, BackendRawEvent, CanonicalOutputMode,
            CanonicalRequest, FinishReason, GenerationRequest, TextStream,
        },
    },
    directive::{self, Directive},
};

/// Issues streaming and structured requests against the configured model
/// endpoint and validates what comes back.
pub struct CompletionGateway {
    router: EndpointRouter,
    credential_provider: Arc<dyn CredentialProvider>,
    endpoint: Arc<dyn ModelEndpoint>,
    request_normalizer: RequestNormalizer,
    reliability: ReliabilityLayer,
}

struct Dispatched {
    stream: AdapterEventStream,
    cancel: Option<AdapterCancelHandle>,
    label: &'static str,
    timeout: Duration,
    deadline: Instant,
}

impl CompletionGateway {
    pub fn new(
        config: AIGatewayConfig,
        credential_provider: Arc<dyn CredentialProvider>,
    ) -> Result<Self, GatewayError> {
        let router = EndpointRouter::new(&config)?;
        Ok(Self {
            router,
            credential_provider,
            endpoint: Arc::new(OpenAiCompatibleAdapter::new()?),
            request_normalizer: RequestNormalizer,
            reliability: ReliabilityLayer::new(config.reliability),
        })
    }

    pub fn with_endpoint(mut self, endpoint: Arc<dyn ModelEndpoint>) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn reliability(&self) -> &ReliabilityLayer {
        &self.reliability
    }

    /// Streams completion fragments as they arrive. The stream ends cleanly on
    /// a successful terminal status or yields exactly one error and ends.
    /// Dropping it cancels the upstream call.
    pub async fn chat_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<TextStream, GatewayError> {
        let canonical = self
            .request_normalizer
            .normalize(request, CanonicalOutputMode::Text, true)?;
        let request_id = canonical.request_id.clone();
        let dispatched = self.dispatch(canonical).await?;

        let (tx, rx) = mpsc::channel::<Result<String, GatewayError>>(64);
        let span = tracing::info_span!(
            target: "ai_gateway",
            "gateway_stream",
            request_id = %request_id,
            endpoint = dispatched.label
        );
        tokio::spawn(relay_fragments(tx, request_id, dispatched).instrument(span));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    pub async fn chat_structured(
        &self,
        request: GenerationRequest,
    ) -> Result<Directive, GatewayError> {
        let content = self.complete_structured(request).await?;
        Ok(directive::extract(&content)?)
    }

    /// Like [`Self::chat_structured`] but returns the recovered object as is.
    pub async fn chat_structured_value(
        &self,
        request: GenerationRequest,
    ) -> Result<Value, GatewayError> {
        let content = self.complete_structured(request).await?;
        Ok(directive::extract_object(&content)?)
    }

    async fn complete_structured(
        &self,
        request: GenerationRequest,
    ) -> Result<String, GatewayError> {
        let canonical = self
            .request_normalizer
            .normalize(request, CanonicalOutputMode::JsonObject, false)?;
        let request_id = canonical.request_id.clone();
        let mut dispatched = self.dispatch(canonical).await?;

        let mut content = String::new();
        let mut finish_reason: Option<FinishReason> = None;

        let outcome: Result<(), GatewayError> = loop {
            let item = tokio::select! {
                _ = sleep_until(dispatched.deadline) => {
                    break Err(timeout_error(dispatched.label));
                }
                item = dispatched.stream.next() => item,
            };

            match item {
                None => break Ok(()),
                Some(Ok(BackendRawEvent::OutputTextDelta { delta })) => content.push_str(&delta),
                Some(Ok(BackendRawEvent::Completed { finish_reason: reason })) => {
                    finish_reason = Some(reason);
                    break Ok(());
                }
                Some(Ok(BackendRawEvent::Failed { error })) | Some(Err(error)) => break Err(error),
            }
        };

        if let Err(err) = outcome {
            if let Some(cancel) = dispatched.cancel.as_ref() {
                cancel();
            }
            emit_gateway_event(GatewayTelemetryEvent::RequestFailed {
                request_id,
                error_kind: err.kind,
            });
            return Err(err);
        }

        let Some(finish_reason) = finish_reason else {
            let err = protocol_violation("structured response ended without terminal status")
                .with_endpoint(dispatched.label);
            emit_gateway_event(GatewayTelemetryEvent::RequestFailed {
                request_id,
                error_kind: err.kind,
            });
            return Err(err);
        };

        if content.trim().is_empty() {
            let err = if finish_reason == FinishReason::ContentFilter {
                safety_rejected("structured response was blocked by the content filter")
            } else {
                empty_response(format!(
                    "structured response content is empty (finish_reason={})",
                    finish_reason.as_str()
                ))
            }
            .with_endpoint(dispatched.label);
            emit_gateway_event(GatewayTelemetryEvent::RequestFailed {
                request_id,
                error_kind: err.kind,
            });
            return Err(err);
        }

        emit_gateway_event(GatewayTelemetryEvent::RequestCompleted {
            request_id,
            output_chars: content.chars().count(),
            finish_reason: finish_reason.as_str().to_string(),
        });
        Ok(content)
    }

    async fn dispatch(&self, canonical: CanonicalRequest) -> Result<Dispatched, GatewayError> {
        let selected = self.router.resolve(canonical.role);
        let credential = self
            .credential_provider
            .resolve(&selected.credential, &selected)
            .await?;

        emit_gateway_event(GatewayTelemetryEvent::RequestStarted {
            request_id: canonical.request_id.clone(),
            endpoint: selected.label,
            model: selected.model.clone(),
            stream: canonical.stream,
        });
        let label = selected.label;
        let timeout = self.reliability.request_timeout();
        let deadline = Instant::now() + timeout;
        let ctx = AdapterContext {
            endpoint: selected,
            credential,
            timeout,
            request_id: canonical.request_id.clone(),
        };

        let invocation = match self.endpoint.invoke(ctx, canonical.clone()).await {
            Ok(invocation) => invocation,
            Err(err) => {
                emit_gateway_event(GatewayTelemetryEvent::RequestFailed {
                    request_id: canonical.request_id,
                    error_kind: err.kind,
                });
                return Err(err);
            }
        };
        tracing::debug!(
            target: "ai_gateway",
            request_id = %canonical.request_id,
            role = canonical.role_label(),
            endpoint = label,
            base_url = %invocation.identity.base_url,
            model = %invocation.identity.model,
            temperature = canonical.temperature,
            output_mode = ?canonical.output_mode,
            "request_dispatched"
        );

        Ok(Dispatched {
            stream: invocation.stream,
            cancel: invocation.cancel,
            label,
            timeout,
            deadline,
        })
    }
}

async fn relay_fragments(
    tx: mpsc::Sender<Result<String, GatewayError>>,
    request_id: String,
    dispatched: Dispatched,
) {
    let Dispatched {
        mut stream,
        cancel,
        label,
        timeout,
        mut deadline,
    } = dispatched;
    let mut fragments = 0_usize;
    let mut output_chars = 0_usize;

    let fire_cancel = || {
        if let Some(cancel) = cancel.as_ref() {
            cancel();
        }
    };

    loop {
        let item = tokio::select! {
            _ = tx.closed() => {
                fire_cancel();
                emit_gateway_event(GatewayTelemetryEvent::RequestCancelled { request_id });
                return;
            }
            _ = sleep_until(deadline) => {
                fire_cancel();
                fail(&tx, request_id, timeout_error(label)).await;
                return;
            }
            item = stream.next() => item,
        };
        // Streaming deadline is idle time between upstream events.
        deadline = Instant::now() + timeout;

        match item {
            None => {
                let err = protocol_violation("endpoint stream ended without terminal status")
                    .with_endpoint(label);
                fail(&tx, request_id, err).await;
                return;
            }
            Some(Ok(BackendRawEvent::OutputTextDelta { delta })) => {
                if delta.is_empty() {
                    continue;
                }
                fragments += 1;
                output_chars += delta.chars().count();
                if tx.send(Ok(delta)).await.is_err() {
                    fire_cancel();
                    emit_gateway_event(GatewayTelemetryEvent::RequestCancelled { request_id });
                    return;
                }
            }
            Some(Ok(BackendRawEvent::Completed { finish_reason })) => {
                if finish_reason == FinishReason::ContentFilter {
                    let err = safety_rejected(format!(
                        "stream was blocked by the content filter after {} fragments",
                        fragments
                    ))
                    .with_endpoint(label);
                    fail(&tx, request_id, err).await;
                } else if fragments == 0 {
                    let err = empty_response(format!(
                        "stream finished without content (finish_reason={})",
                        finish_reason.as_str()
                    ))
                    .with_endpoint(label);
                    fail(&tx, request_id, err).await;
                } else {
                    emit_gateway_event(GatewayTelemetryEvent::RequestCompleted {
                        request_id,
                        output_chars,
                        finish_reason: finish_reason.as_str().to_string(),
                    });
                }
                return;
            }
            Some(Ok(BackendRawEvent::Failed { error })) | Some(Err(error)) => {
                fail(&tx, request_id, error).await;
                return;
            }
        }
    }
}

async fn fail(
    tx: &mpsc::Sender<Result<String, GatewayError>>,
    request_id: String,
    err: GatewayError,
) {
    emit_gateway_event(GatewayTelemetryEvent::RequestFailed {
        request_id,
        error_kind: err.kind,
    });
    let _ = tx.send(Err(err)).await;
}

fn timeout_error(label: &'static str) -> GatewayError {
    GatewayError::new(GatewayErrorKind::Timeout, "endpoint request timed out").with_endpoint(label)
}
