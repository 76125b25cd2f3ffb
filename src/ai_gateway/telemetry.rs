use crate::ai_gateway::{error::GatewayErrorKind, types::RequestId};

/// Upstream calls are reported by the gateway; attempts by the orchestrator.
#[derive(Debug, Clone)]
pub enum GatewayTelemetryEvent {
    RequestStarted {
        request_id: RequestId,
        endpoint: &'static str,
        model: String,
        stream: bool,
    },
    RequestCompleted {
        request_id: RequestId,
        output_chars: usize,
        finish_reason: String,
    },
    RequestFailed {
        request_id: RequestId,
        error_kind: GatewayErrorKind,
    },
    RequestCancelled {
        request_id: RequestId,
    },
    AttemptStarted {
        request_id: RequestId,
        attempt: u32,
        temperature: f32,
    },
    AttemptFailed {
        request_id: RequestId,
        attempt: u32,
        kind: GatewayErrorKind,
        will_retry: bool,
    },
}

pub fn emit_gateway_event(event: GatewayTelemetryEvent) {
    match event {
        GatewayTelemetryEvent::RequestStarted {
            request_id,
            endpoint,
            model,
            stream,
        } => {
            tracing::info!(
                target: "ai_gateway",
                request_id = %request_id,
                endpoint = endpoint,
                model = %model,
                stream = stream,
                "request_started"
            );
        }
        GatewayTelemetryEvent::RequestCompleted {
            request_id,
            output_chars,
            finish_reason,
        } => {
            tracing::info!(
                target: "ai_gateway",
                request_id = %request_id,
                output_chars = output_chars,
                finish_reason = %finish_reason,
                "request_completed"
            );
        }
        GatewayTelemetryEvent::RequestFailed {
            request_id,
            error_kind,
        } => {
            tracing::warn!(
                target: "ai_gateway",
                request_id = %request_id,
                error_kind = ?error_kind,
                "request_failed"
            );
        }
        GatewayTelemetryEvent::RequestCancelled { request_id } => {
            tracing::info!(
                target: "ai_gateway",
                request_id = %request_id,
                "request_cancelled"
            );
        }
        GatewayTelemetryEvent::AttemptStarted {
            request_id,
            attempt,
            temperature,
        } => {
            tracing::debug!(
                target: "ai_gateway",
                request_id = %request_id,
                attempt = attempt,
                temperature = temperature,
                "attempt_started"
            );
        }
        GatewayTelemetryEvent::AttemptFailed {
            request_id,
            attempt,
            kind,
            will_retry,
        } => {
            tracing::warn!(
                target: "ai_gateway",
                request_id = %request_id,
                attempt = attempt,
                kind = ?kind,
                will_retry = will_retry,
                "attempt_failed"
            );
        }
    }
}
