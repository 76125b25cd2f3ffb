use std::{convert::Infallible, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    admission::{AdmissionError, SessionAdmissionController},
    ai_gateway::{
        credentials::EnvCredentialProvider,
        error::{GatewayError, GatewayErrorKind},
        gateway::CompletionGateway,
        orchestrator::{RetryOrchestrator, StreamEventStream},
        types_chat::GenerationRequest,
    },
    config::Config,
    moderation::ContentModerator,
};

pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<SessionAdmissionController>,
    pub gateway: Arc<CompletionGateway>,
    pub orchestrator: RetryOrchestrator,
    pub moderator: Arc<ContentModerator>,
}

impl AppState {
    pub fn new(
        admission: Arc<SessionAdmissionController>,
        gateway: Arc<CompletionGateway>,
    ) -> Self {
        Self {
            orchestrator: RetryOrchestrator::new(Arc::clone(&gateway)),
            moderator: Arc::new(ContentModerator::new(Arc::clone(&gateway))),
            admission,
            gateway,
        }
    }
}

pub async fn run(config: Config) -> Result<()> {
    let gateway = CompletionGateway::new(config.ai_gateway.clone(), Arc::new(EnvCredentialProvider))
        .context("failed to construct completion gateway")?;
    let admission = Arc::new(SessionAdmissionController::new(config.admission.clone()));
    let state = AppState::new(Arc::clone(&admission), Arc::new(gateway));

    let sweeper_cancel = CancellationToken::new();
    let sweeper = admission.spawn_sweeper(sweeper_cancel.clone());

    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("unable to bind {}", config.server.listen_addr))?;
    tracing::info!(
        target: "server",
        addr = %config.server.listen_addr,
        max_public_users = admission.config().max_public_users,
        "server_listening"
    );

    let app = router(state, &config.server.allowed_origins);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let signal_name = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            };
            tracing::info!(target: "server", signal = signal_name, "shutdown_requested");
        })
        .await
        .context("http server failed")?;

    sweeper_cancel.cancel();
    sweeper.await.context("session sweeper join failed")?;
    tracing::info!(target: "server", "server_stopped");
    Ok(())
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/system/users", get(system_users))
        .route("/api/system/join", post(join))
        .route("/api/generate/stream", post(generate_stream))
        .route("/api/generate/structured", post(generate_structured))
        .route("/api/moderate", post(moderate))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(
                        target: "server",
                        origin = %origin,
                        "invalid_cors_origin_skipped"
                    );
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(SESSION_TOKEN_HEADER),
        ])
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModerateBody {
    text: String,
}

fn session_token(headers: &HeaderMap, query: &TokenQuery) -> Option<String> {
    headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.token.clone())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn system_users(State(state): State<AppState>) -> Response {
    Json(state.admission.snapshot().await).into_response()
}

async fn join(State(state): State<AppState>) -> Result<Response, ApiError> {
    let token = state.admission.join().await?;
    Ok(Json(json!({ "token": token })).into_response())
}

async fn generate_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(request): Json<GenerationRequest>,
) -> Result<Response, ApiError> {
    state
        .admission
        .require(session_token(&headers, &query).as_deref())
        .await?;

    let events = state.orchestrator.run(request);
    Ok(Sse::new(make_sse_stream(events))
        .keep_alive(KeepAlive::default())
        .into_response())
}

async fn generate_structured(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(request): Json<GenerationRequest>,
) -> Result<Response, ApiError> {
    state
        .admission
        .require(session_token(&headers, &query).as_deref())
        .await?;

    let directive = state.gateway.chat_structured(request).await?;
    Ok(Json(directive).into_response())
}

async fn moderate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(body): Json<ModerateBody>,
) -> Result<Response, ApiError> {
    state
        .admission
        .require(session_token(&headers, &query).as_deref())
        .await?;

    Ok(Json(state.moderator.check(&body.text).await).into_response())
}

// Dropping this stream (client disconnect) drops the orchestrator's receiver,
// which cancels the upstream call.
fn make_sse_stream(mut events: StreamEventStream) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(event) = events.next().await {
            yield Ok(Event::default().event(event.name()).data(event.data().to_string()));
        }
    }
}

pub enum ApiError {
    Admission(AdmissionError),
    Gateway(GatewayError),
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        ApiError::Admission(err)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::Gateway(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Admission(err) => {
                let (status, kind) = match &err {
                    AdmissionError::CapacityExceeded { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "capacity_exceeded")
                    }
                    AdmissionError::SessionInvalid => (StatusCode::UNAUTHORIZED, "session_invalid"),
                };
                (status, Json(json!({ "error": err.to_string(), "kind": kind }))).into_response()
            }
            ApiError::Gateway(err) => {
                let status = gateway_status(&err);
                tracing::warn!(
                    target: "server",
                    status = status.as_u16(),
                    kind = ?err.kind,
                    error = %err,
                    "gateway_request_failed"
                );
                let mut body = json!({ "error": err.message, "kind": err.kind });
                if let Some(raw) = err.raw_text {
                    body["raw"] = json!(raw);
                }
                (status, Json(body)).into_response()
            }
        }
    }
}

fn gateway_status(err: &GatewayError) -> StatusCode {
    match err.kind {
        GatewayErrorKind::ExtractionFailed => StatusCode::UNPROCESSABLE_ENTITY,
        // Rejected before reaching any endpoint.
        GatewayErrorKind::InvalidRequest
            if err.provider_http_status.is_none() && err.endpoint.is_none() =>
        {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}
