#![allow(dead_code)]

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_stream::iter;

use wasteland::ai_gateway::{
    adapters::{AdapterContext, ModelEndpoint},
    credentials::CredentialProvider,
    error::{GatewayError, internal_error},
    gateway::CompletionGateway,
    router::SelectedEndpoint,
    types::{
        AIGatewayConfig, CredentialRef, EndpointConfig, EndpointOverride, ReliabilityConfig,
        ResolvedCredential, Role,
    },
    types_chat::{
        AdapterInvocation, BackendRawEvent, CanonicalRequest, EndpointIdentity, FinishReason,
    },
};

#[derive(Default)]
pub struct StaticCredentialProvider;

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(
        &self,
        _reference: &CredentialRef,
        _endpoint: &SelectedEndpoint,
    ) -> Result<ResolvedCredential, GatewayError> {
        Ok(ResolvedCredential::none())
    }
}

/// What one invocation of [`ScriptedEndpoint`] does.
pub enum Script {
    Events(Vec<Result<BackendRawEvent, GatewayError>>),
    InvokeError(GatewayError),
    /// Never yields; records cancellation through the cancel handle.
    Pending,
}

pub fn delta(text: &str) -> Result<BackendRawEvent, GatewayError> {
    Ok(BackendRawEvent::OutputTextDelta {
        delta: text.to_string(),
    })
}

pub fn finish(finish_reason: FinishReason) -> Result<BackendRawEvent, GatewayError> {
    Ok(BackendRawEvent::Completed { finish_reason })
}

pub fn text_completion(parts: &[&str]) -> Script {
    let mut events: Vec<_> = parts.iter().map(|part| delta(part)).collect();
    events.push(finish(FinishReason::Stop));
    Script::Events(events)
}

pub fn safety_rejection() -> Script {
    Script::Events(vec![finish(FinishReason::ContentFilter)])
}

#[derive(Default)]
pub struct ScriptedEndpoint {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    cancelled: Arc<AtomicBool>,
    requests: Mutex<Vec<CanonicalRequest>>,
    endpoints: Mutex<Vec<SelectedEndpoint>>,
}

impl ScriptedEndpoint {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CanonicalRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn endpoints(&self) -> Vec<SelectedEndpoint> {
        self.endpoints.lock().expect("endpoints lock").clone()
    }

    pub async fn wait_for_calls(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.calls() < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("endpoint should be invoked in time");
    }

    pub async fn wait_for_cancel(&self) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !self.was_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("upstream call should be cancelled in time");
    }
}

#[async_trait]
impl ModelEndpoint for ScriptedEndpoint {
    async fn invoke(
        &self,
        ctx: AdapterContext,
        req: CanonicalRequest,
    ) -> Result<AdapterInvocation, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(req);
        self.endpoints
            .lock()
            .expect("endpoints lock")
            .push(ctx.endpoint.clone());

        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_else(|| Script::InvokeError(internal_error("no scripted response left")));

        let identity = EndpointIdentity {
            base_url: ctx.endpoint.base_url.clone(),
            model: ctx.endpoint.model.clone(),
        };

        match script {
            Script::InvokeError(err) => Err(err),
            Script::Events(events) => Ok(AdapterInvocation {
                stream: Box::pin(iter(events)),
                identity,
                cancel: None,
            }),
            Script::Pending => {
                let cancelled = Arc::clone(&self.cancelled);
                Ok(AdapterInvocation {
                    stream: Box::pin(futures_util::stream::pending::<
                        Result<BackendRawEvent, GatewayError>,
                    >()),
                    identity,
                    cancel: Some(Arc::new(move || cancelled.store(true, Ordering::SeqCst))),
                })
            }
        }
    }
}

pub fn gateway_config() -> AIGatewayConfig {
    let mut roles = BTreeMap::new();
    roles.insert(
        Role::Judge,
        EndpointOverride {
            model: Some("m-judge".to_string()),
            ..EndpointOverride::default()
        },
    );
    roles.insert(
        Role::Narrator,
        EndpointOverride {
            base_url: Some("https://narrator.invalid/v1".to_string()),
            model: Some("   ".to_string()),
            credential: None,
        },
    );

    AIGatewayConfig {
        default: EndpointConfig {
            base_url: "https://example.invalid/v1".to_string(),
            model: "m-default".to_string(),
            credential: CredentialRef::None,
        },
        roles,
        reliability: ReliabilityConfig {
            request_timeout_ms: 30_000,
            ..ReliabilityConfig::default()
        },
    }
}

pub fn gateway_with(
    config: AIGatewayConfig,
    endpoint: Arc<ScriptedEndpoint>,
) -> Arc<CompletionGateway> {
    Arc::new(
        CompletionGateway::new(config, Arc::new(StaticCredentialProvider))
            .expect("gateway should build")
            .with_endpoint(endpoint),
    )
}

pub fn gateway(endpoint: Arc<ScriptedEndpoint>) -> Arc<CompletionGateway> {
    gateway_with(gateway_config(), endpoint)
}
