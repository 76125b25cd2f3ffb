use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, header};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::ai_gateway::{
    adapters::{AdapterContext, ModelEndpoint, http_common},
    error::{GatewayError, GatewayErrorKind, empty_response, internal_error, protocol_violation},
    types_chat::{
        AdapterInvocation, BackendRawEvent, CanonicalRequest, EndpointIdentity, FinishReason,
    },
};

#[derive(Clone)]
pub struct OpenAiCompatibleAdapter {
    client: Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new() -> Result<Self, GatewayError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| internal_error(format!("failed to build http client: {}", err)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ModelEndpoint for OpenAiCompatibleAdapter {
    async fn invoke(
        &self,
        ctx: AdapterContext,
        req: CanonicalRequest,
    ) -> Result<AdapterInvocation, GatewayError> {
        let base_url = ctx.endpoint.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(GatewayError::new(
                GatewayErrorKind::InvalidRequest,
                "openai-compatible endpoint requires base_url",
            )
            .with_endpoint(ctx.endpoint.label));
        }

        let url = format!("{}/chat/completions", base_url);
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();

        let (tx, rx) = mpsc::channel::<Result<BackendRawEvent, GatewayError>>(64);
        let client = self.client.clone();
        let label = ctx.endpoint.label;
        let model = ctx.endpoint.model;
        let body = http_common::request_body(&req, &model);
        let timeout = ctx.timeout;
        let request_id = ctx.request_id;
        let credential = ctx.credential;

        tokio::spawn(async move {
            let mut req_builder = client
                .post(url)
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-request-id", request_id)
                .json(&body);
            // A streamed body is bounded by the gateway's idle deadline instead.
            if !req.stream {
                req_builder = req_builder.timeout(timeout);
            }

            if let Some(auth_header) = credential.auth_header {
                req_builder = req_builder.header(header::AUTHORIZATION, auth_header);
            }
            for (k, v) in credential.extra_headers {
                req_builder = req_builder.header(k, v);
            }

            let response = tokio::select! {
                _ = task_token.cancelled() => return,
                sent = req_builder.send() => match sent {
                    Ok(response) => response,
                    Err(err) => {
                        let _ = tx.send(Err(http_common::map_transport_error(&err, label))).await;
                        return;
                    }
                },
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let _ = tx
                    .send(Err(http_common::map_http_error(status, label, &body)))
                    .await;
                return;
            }

            if req.stream {
                relay_sse(response, tx, task_token, label).await;
                return;
            }

            let payload = tokio::select! {
                _ = task_token.cancelled() => return,
                decoded = response.json::<Value>() => match decoded {
                    Ok(payload) => payload,
                    Err(err) => {
                        let err = if err.is_timeout() {
                            http_common::map_transport_error(&err, label)
                        } else {
                            protocol_violation(format!(
                                "openai-compatible body decode failed: {}",
                                err
                            ))
                            .with_endpoint(label)
                        };
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                },
            };

            match parse_non_stream_payload(&payload, label) {
                Ok(events) => {
                    for event in events {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                }
            }
        });

        let cancel = Arc::new(move || cancel_token.cancel());

        Ok(AdapterInvocation {
            stream: Box::pin(ReceiverStream::new(rx)),
            identity: EndpointIdentity { base_url, model },
            cancel: Some(cancel),
        })
    }
}

async fn relay_sse(
    response: reqwest::Response,
    tx: mpsc::Sender<Result<BackendRawEvent, GatewayError>>,
    cancel_token: CancellationToken,
    label: &'static str,
) {
    let mut stream = response.bytes_stream();
    // Raw bytes; a network chunk may end inside a multibyte character.
    let mut buffer: Vec<u8> = Vec::new();
    let mut saw_terminal = false;

    loop {
        let item = tokio::select! {
            _ = cancel_token.cancelled() => return,
            item = stream.next() => item,
        };
        let Some(item) = item else {
            break;
        };

        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = tx
                    .send(Err(http_common::map_transport_error(&err, label)))
                    .await;
                return;
            }
        };

        buffer.extend_from_slice(&chunk);
        while let Some(idx) = buffer.iter().position(|byte| *byte == b'\n') {
            let line_bytes: Vec<u8> = buffer.drain(..=idx).collect();
            let line = match std::str::from_utf8(&line_bytes[..idx]) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(err) => {
                    let _ = tx
                        .send(Err(protocol_violation(format!(
                            "openai-compatible SSE line is not valid UTF-8: {}",
                            err
                        ))
                        .with_endpoint(label)))
                        .await;
                    return;
                }
            };

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                if !saw_terminal {
                    let _ = tx
                        .send(Ok(BackendRawEvent::Completed {
                            finish_reason: FinishReason::Stop,
                        }))
                        .await;
                }
                return;
            }

            let parsed = match serde_json::from_str::<Value>(data) {
                Ok(parsed) => parsed,
                Err(err) => {
                    let _ = tx
                        .send(Err(protocol_violation(format!(
                            "failed to parse openai-compatible SSE payload: {}",
                            err
                        ))
                        .with_endpoint(label)))
                        .await;
                    return;
                }
            };

            match parse_stream_payload(&parsed, label) {
                Ok(events) => {
                    for event in events {
                        if matches!(event, BackendRawEvent::Completed { .. }) {
                            saw_terminal = true;
                        }
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    }

    if !saw_terminal {
        let _ = tx
            .send(Ok(BackendRawEvent::Completed {
                finish_reason: FinishReason::Stop,
            }))
            .await;
    }
}

pub(crate) fn parse_stream_payload(
    payload: &Value,
    label: &str,
) -> Result<Vec<BackendRawEvent>, GatewayError> {
    if let Some(error) = payload.get("error") {
        return Err(upstream_error_payload(error, label));
    }

    let mut events = Vec::new();
    let choices = payload
        .get("choices")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            protocol_violation("openai-compatible stream payload missing choices")
                .with_endpoint(label.to_string())
        })?;

    for choice in choices {
        if let Some(content) = choice
            .get("delta")
            .and_then(|delta| delta.get("content"))
            .and_then(Value::as_str)
            && !content.is_empty()
        {
            events.push(BackendRawEvent::OutputTextDelta {
                delta: content.to_string(),
            });
        }

        let finish_reason = choice.get("finish_reason").and_then(Value::as_str);
        if finish_reason.is_some() {
            events.push(BackendRawEvent::Completed {
                finish_reason: http_common::parse_finish_reason(finish_reason),
            });
        }
    }

    Ok(events)
}

pub(crate) fn parse_non_stream_payload(
    payload: &Value,
    label: &str,
) -> Result<Vec<BackendRawEvent>, GatewayError> {
    if let Some(error) = payload.get("error") {
        return Err(upstream_error_payload(error, label));
    }

    let choice = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| {
            empty_response("endpoint returned an empty choices list")
                .with_endpoint(label.to_string())
        })?;

    let mut events = Vec::new();
    if let Some(content) = choice
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        && !content.is_empty()
    {
        events.push(BackendRawEvent::OutputTextDelta {
            delta: content.to_string(),
        });
    }

    let finish_reason = choice.get("finish_reason").and_then(Value::as_str);
    events.push(BackendRawEvent::Completed {
        finish_reason: http_common::parse_finish_reason(finish_reason),
    });

    Ok(events)
}

fn upstream_error_payload(error: &Value, label: &str) -> GatewayError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("endpoint reported an error");
    let mut err = GatewayError::new(
        GatewayErrorKind::BackendTransient,
        format!("openai-compatible error payload: {}", message),
    )
    .with_endpoint(label.to_string());
    if let Some(code) = error.get("code").and_then(Value::as_str) {
        err = err.with_provider_code(code);
    }
    err
}
