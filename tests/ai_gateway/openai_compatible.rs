use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, Bytes},
    http::{StatusCode, header},
    routing::post,
};
use futures_util::StreamExt;
use tokio::net::TcpListener;

use wasteland::ai_gateway::{
    error::GatewayErrorKind,
    gateway::CompletionGateway,
    types::{AIGatewayConfig, CredentialRef, EndpointConfig, ReliabilityConfig},
    types_chat::GenerationRequest,
};

use crate::support::StaticCredentialProvider;

/// Serves one canned `/chat/completions` response on a loopback port.
async fn spawn_upstream(status: StatusCode, content_type: &'static str, body: String) -> String {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let body = body.clone();
            async move { (status, [(header::CONTENT_TYPE, content_type)], body) }
        }),
    );
    serve(app).await
}

/// Serves the response body in separate writes, pausing between them.
async fn spawn_chunked_upstream(chunks: Vec<Vec<u8>>, gap: Duration) -> String {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let chunks = chunks.clone();
            async move {
                let body = async_stream::stream! {
                    for (idx, chunk) in chunks.into_iter().enumerate() {
                        if idx > 0 {
                            tokio::time::sleep(gap).await;
                        }
                        yield Ok::<_, Infallible>(Bytes::from(chunk));
                    }
                };
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    Body::from_stream(body),
                )
            }
        }),
    );
    serve(app).await
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("loopback listener should bind");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{}/v1", addr)
}

fn gateway(base_url: String) -> CompletionGateway {
    gateway_with_timeout(base_url, ReliabilityConfig::default().request_timeout_ms)
}

fn gateway_with_timeout(base_url: String, request_timeout_ms: u64) -> CompletionGateway {
    let config = AIGatewayConfig {
        default: EndpointConfig {
            base_url,
            model: "m-http".to_string(),
            credential: CredentialRef::None,
        },
        reliability: ReliabilityConfig {
            request_timeout_ms,
            ..ReliabilityConfig::default()
        },
        ..AIGatewayConfig::default()
    };
    CompletionGateway::new(config, Arc::new(StaticCredentialProvider))
        .expect("gateway should build")
}

fn sse(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str("data: ");
        body.push_str(chunk);
        body.push_str("\n\n");
    }
    body
}

fn request() -> GenerationRequest {
    GenerationRequest::new("sys", "Describe the dust storm")
}

#[tokio::test]
async fn streams_sse_deltas_until_done_marker() {
    let base_url = spawn_upstream(
        StatusCode::OK,
        "text/event-stream",
        sse(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Dust "}}]}"#,
            r#"{"choices":[{"delta":{"content":"everywhere."}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]),
    )
    .await;

    let fragments: Vec<String> = gateway(base_url)
        .chat_stream(request())
        .await
        .expect("stream should open")
        .map(|item| item.expect("fragment"))
        .collect()
        .await;

    assert_eq!(fragments.concat(), "Dust everywhere.");
}

#[tokio::test]
async fn multibyte_text_split_across_network_chunks_is_reassembled() {
    let body = sse(&[
        r#"{"choices":[{"delta":{"content":"废土"}}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ])
    .into_bytes();
    let cut = body
        .windows("废".len())
        .position(|window| window == "废".as_bytes())
        .expect("fixture contains the character")
        + 1;
    let base_url = spawn_chunked_upstream(
        vec![body[..cut].to_vec(), body[cut..].to_vec()],
        Duration::from_millis(50),
    )
    .await;

    let fragments: Vec<String> = gateway(base_url)
        .chat_stream(request())
        .await
        .expect("stream should open")
        .map(|item| item.expect("fragment"))
        .collect()
        .await;

    assert_eq!(fragments.concat(), "废土");
}

#[tokio::test]
async fn steady_stream_outlasting_the_timeout_is_not_cut_off() {
    let chunks: Vec<Vec<u8>> = ["Snow ", "keeps ", "falling ", "on the ", "ruins."]
        .iter()
        .map(|part| {
            let payload = format!(r#"{{"choices":[{{"delta":{{"content":"{part}"}}}}]}}"#);
            sse(&[payload.as_str()]).into_bytes()
        })
        .chain(std::iter::once(
            sse(&[r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#, "[DONE]"]).into_bytes(),
        ))
        .collect();
    let base_url = spawn_chunked_upstream(chunks, Duration::from_millis(60)).await;

    let items: Vec<_> = gateway_with_timeout(base_url, 200)
        .chat_stream(request())
        .await
        .expect("stream should open")
        .collect()
        .await;

    let text: String = items
        .into_iter()
        .map(|item| item.expect("no timeout while fragments keep arriving"))
        .collect();
    assert_eq!(text, "Snow keeps falling on the ruins.");
}

#[tokio::test]
async fn content_filter_finish_in_sse_is_a_safety_rejection() {
    let base_url = spawn_upstream(
        StatusCode::OK,
        "text/event-stream",
        sse(&[
            r#"{"choices":[{"delta":{},"finish_reason":"content_filter"}]}"#,
            "[DONE]",
        ]),
    )
    .await;

    let items: Vec<_> = gateway(base_url)
        .chat_stream(request())
        .await
        .expect("stream should open")
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].as_ref().expect_err("rejection").kind,
        GatewayErrorKind::SafetyRejected
    );
}

#[tokio::test]
async fn structured_response_body_is_decoded_into_directive() {
    let base_url = spawn_upstream(
        StatusCode::OK,
        "application/json",
        serde_json::json!({
            "choices": [{
                "message": {"content": "```json\n{\"score\": 12, \"remove_hidden_tags\": [\"lost\"]}\n```"},
                "finish_reason": "stop"
            }]
        })
        .to_string(),
    )
    .await;

    let directive = gateway(base_url)
        .chat_structured(request())
        .await
        .expect("directive should decode");

    assert_eq!(directive.score, Some(12));
    assert_eq!(directive.remove_tags, vec!["lost".to_string()]);
}

#[tokio::test]
async fn structured_response_without_choices_is_empty_response() {
    let base_url = spawn_upstream(
        StatusCode::OK,
        "application/json",
        r#"{"choices": []}"#.to_string(),
    )
    .await;

    let err = gateway(base_url)
        .chat_structured(request())
        .await
        .expect_err("should be empty");
    assert_eq!(err.kind, GatewayErrorKind::EmptyResponse);
}

#[tokio::test]
async fn rate_limit_status_is_an_upstream_error() {
    let base_url = spawn_upstream(
        StatusCode::TOO_MANY_REQUESTS,
        "application/json",
        r#"{"error":{"message":"slow down"}}"#.to_string(),
    )
    .await;

    let err = gateway(base_url)
        .chat_structured(request())
        .await
        .expect_err("should be rate limited");
    assert_eq!(err.kind, GatewayErrorKind::RateLimited);
    assert_eq!(err.provider_http_status, Some(429));
    assert!(!err.is_safety_rejection());
}
