use std::time::Duration;

use futures_util::StreamExt;

use wasteland::ai_gateway::{
    error::{GatewayError, GatewayErrorKind},
    types::ReliabilityConfig,
    types_chat::{FinishReason, GenerationRequest},
};

use crate::support::{
    Script, ScriptedEndpoint, delta, finish, gateway, gateway_config, gateway_with,
    safety_rejection, text_completion,
};

fn request() -> GenerationRequest {
    GenerationRequest::new("you narrate a wasteland", "I search the ruined pharmacy")
}

async fn collect(
    gateway: &wasteland::ai_gateway::gateway::CompletionGateway,
    request: GenerationRequest,
) -> Vec<Result<String, GatewayError>> {
    gateway
        .chat_stream(request)
        .await
        .expect("stream should open")
        .collect()
        .await
}

#[tokio::test]
async fn given_normal_completion_when_streaming_then_fragments_arrive_in_order_and_stream_ends() {
    let endpoint = ScriptedEndpoint::new(vec![text_completion(&["The shelves ", "are bare."])]);
    let gateway = gateway(endpoint.clone());

    let items = collect(&gateway, request()).await;
    let fragments: Vec<String> = items
        .into_iter()
        .map(|item| item.expect("no error expected"))
        .collect();

    assert_eq!(fragments, vec!["The shelves ", "are bare."]);
    let sent = endpoint.requests();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].stream);
}

#[tokio::test]
async fn given_safety_finish_without_output_when_streaming_then_safety_rejection_is_yielded() {
    let gateway = gateway(ScriptedEndpoint::new(vec![safety_rejection()]));

    let items = collect(&gateway, request()).await;

    assert_eq!(items.len(), 1);
    let err = items[0].as_ref().expect_err("should be an error");
    assert_eq!(err.kind, GatewayErrorKind::SafetyRejected);
    assert!(err.is_safety_rejection());
}

#[tokio::test]
async fn given_safety_finish_after_partial_output_when_streaming_then_error_follows_fragments() {
    let gateway = gateway(ScriptedEndpoint::new(vec![Script::Events(vec![
        delta("You raise the"),
        finish(FinishReason::ContentFilter),
    ])]));

    let items = collect(&gateway, request()).await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().expect("fragment"), "You raise the");
    assert_eq!(
        items[1].as_ref().expect_err("terminal error").kind,
        GatewayErrorKind::SafetyRejected
    );
}

#[tokio::test]
async fn given_normal_finish_without_output_when_streaming_then_empty_response_is_yielded() {
    let gateway = gateway(ScriptedEndpoint::new(vec![Script::Events(vec![finish(
        FinishReason::Length,
    )])]));

    let items = collect(&gateway, request()).await;

    assert_eq!(items.len(), 1);
    let err = items[0].as_ref().expect_err("should be an error");
    assert_eq!(err.kind, GatewayErrorKind::EmptyResponse);
    assert!(!err.is_safety_rejection());
}

#[tokio::test]
async fn given_transport_failure_mid_stream_when_streaming_then_upstream_error_ends_stream() {
    let gateway = gateway(ScriptedEndpoint::new(vec![Script::Events(vec![
        delta("Static crackles"),
        Err(GatewayError::new(GatewayErrorKind::BackendTransient, "connection reset")),
        delta("never delivered"),
    ])]));

    let items = collect(&gateway, request()).await;

    assert_eq!(items.len(), 2);
    assert_eq!(
        items[1].as_ref().expect_err("terminal error").kind,
        GatewayErrorKind::BackendTransient
    );
}

#[tokio::test]
async fn given_stream_without_terminal_status_when_streaming_then_protocol_violation_is_yielded() {
    let gateway = gateway(ScriptedEndpoint::new(vec![Script::Events(vec![delta("cut")])]));

    let items = collect(&gateway, request()).await;

    assert_eq!(
        items.last().expect("items").as_ref().expect_err("error").kind,
        GatewayErrorKind::ProtocolViolation
    );
}

#[tokio::test]
async fn given_invoke_failure_when_opening_stream_then_error_is_returned_directly() {
    let gateway = gateway(ScriptedEndpoint::new(vec![Script::InvokeError(
        GatewayError::new(GatewayErrorKind::Authentication, "bad key"),
    )]));

    let err = match gateway.chat_stream(request()).await {
        Ok(_) => panic!("opening should fail"),
        Err(err) => err,
    };
    assert_eq!(err.kind, GatewayErrorKind::Authentication);
}

#[tokio::test]
async fn given_blank_user_prompt_when_streaming_then_request_is_rejected_before_dispatch() {
    let endpoint = ScriptedEndpoint::new(vec![]);
    let gateway = gateway(endpoint.clone());

    let result = gateway
        .chat_stream(GenerationRequest::new("sys", "  "))
        .await;

    assert!(matches!(result, Err(err) if err.kind == GatewayErrorKind::InvalidRequest));
    assert_eq!(endpoint.calls(), 0);
}

#[tokio::test]
async fn given_role_overrides_when_streaming_then_each_field_falls_back_independently() {
    let endpoint = ScriptedEndpoint::new(vec![
        text_completion(&["a"]),
        text_completion(&["b"]),
        text_completion(&["c"]),
        text_completion(&["d"]),
    ]);
    let gateway = gateway(endpoint.clone());

    for role in [Some("judge"), Some("narrator"), Some("bard"), None] {
        let mut req = request();
        req.role = role.map(str::to_string);
        collect(&gateway, req).await;
    }

    let endpoints = endpoint.endpoints();
    assert_eq!(endpoints[0].label, "judge");
    assert_eq!(endpoints[0].model, "m-judge");
    assert_eq!(endpoints[0].base_url, "https://example.invalid/v1");

    assert_eq!(endpoints[1].label, "narrator");
    assert_eq!(endpoints[1].base_url, "https://narrator.invalid/v1");
    assert_eq!(endpoints[1].model, "m-default");

    assert_eq!(endpoints[2].label, "default");
    assert_eq!(endpoints[2].model, "m-default");
    assert_eq!(endpoints[3].label, "default");
}

#[tokio::test]
async fn given_silent_endpoint_when_timeout_elapses_then_timeout_error_and_cancel_fire() {
    let endpoint = ScriptedEndpoint::new(vec![Script::Pending]);
    let mut config = gateway_config();
    config.reliability = ReliabilityConfig {
        request_timeout_ms: 50,
        ..ReliabilityConfig::default()
    };
    let gateway = gateway_with(config, endpoint.clone());

    let items = tokio::time::timeout(Duration::from_secs(2), collect(&gateway, request()))
        .await
        .expect("timeout should end the stream");

    assert_eq!(items.len(), 1);
    let err = items[0].as_ref().expect_err("should time out");
    assert_eq!(err.kind, GatewayErrorKind::Timeout);
    assert!(!err.is_safety_rejection());
    assert!(endpoint.was_cancelled());
}

#[tokio::test]
async fn given_open_stream_when_consumer_drops_it_then_upstream_call_is_cancelled() {
    let endpoint = ScriptedEndpoint::new(vec![Script::Pending]);
    let gateway = gateway(endpoint.clone());

    let stream = gateway.chat_stream(request()).await.expect("stream should open");
    assert!(!endpoint.was_cancelled());
    drop(stream);

    endpoint.wait_for_cancel().await;
}
