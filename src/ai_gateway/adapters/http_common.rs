use serde_json::{Value, json};

use crate::ai_gateway::{
    error::{GatewayError, GatewayErrorKind},
    types_chat::{CanonicalOutputMode, CanonicalRequest, FinishReason},
};

pub fn request_body(req: &CanonicalRequest, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "messages": [
            {"role": "system", "content": req.system_prompt},
            {"role": "user", "content": req.user_prompt},
        ],
        "temperature": req.temperature,
        "stream": req.stream,
    });

    if matches!(req.output_mode, CanonicalOutputMode::JsonObject) {
        body["response_format"] = json!({"type": "json_object"});
    }

    body
}

pub fn parse_finish_reason(value: Option<&str>) -> FinishReason {
    match value.unwrap_or("stop") {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

pub fn map_transport_error(err: &reqwest::Error, endpoint: &str) -> GatewayError {
    let kind = if err.is_timeout() {
        GatewayErrorKind::Timeout
    } else {
        GatewayErrorKind::BackendTransient
    };
    GatewayError::new(kind, format!("openai-compatible request failed: {}", err))
        .with_endpoint(endpoint.to_string())
}

pub fn map_http_error(status: u16, endpoint: &str, body: &str) -> GatewayError {
    let normalized_body = body.chars().take(240).collect::<String>();

    let mut err = if status == 401 {
        GatewayError::new(GatewayErrorKind::Authentication, "authentication failed")
    } else if status == 403 {
        GatewayError::new(GatewayErrorKind::Authorization, "authorization failed")
    } else if status == 408 || status == 429 {
        GatewayError::new(
            GatewayErrorKind::RateLimited,
            format!("endpoint returned status {}", status),
        )
    } else if (400..500).contains(&status) {
        GatewayError::new(
            GatewayErrorKind::InvalidRequest,
            format!("endpoint returned status {}", status),
        )
    } else {
        GatewayError::new(
            GatewayErrorKind::BackendTransient,
            format!("endpoint returned status {}", status),
        )
    };

    err = err
        .with_endpoint(endpoint.to_string())
        .with_provider_http_status(status);

    if !normalized_body.is_empty() {
        err.message = format!("{}: {}", err.message, normalized_body);
    }

    err
}
