use std::time::Duration;

use async_trait::async_trait;

use crate::ai_gateway::{
    error::GatewayError,
    router::SelectedEndpoint,
    types::{RequestId, ResolvedCredential},
    types_chat::{AdapterInvocation, CanonicalRequest},
};

pub mod http_common;
pub mod openai_compatible;

#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub endpoint: SelectedEndpoint,
    pub credential: ResolvedCredential,
    pub timeout: Duration,
    pub request_id: RequestId,
}

/// The model endpoint collaborator. Streaming and structured requests share
/// one invocation shape: a raw event stream ending in a terminal event.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    async fn invoke(
        &self,
        ctx: AdapterContext,
        req: CanonicalRequest,
    ) -> Result<AdapterInvocation, GatewayError>;
}
