use std::{pin::Pin, sync::Arc};

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::ai_gateway::{
    error::GatewayError,
    types::{RequestId, Role},
};

fn default_temperature() -> f32 {
    1.0
}

/// Caller-facing request shape; validated once into a [`CanonicalRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub role: Option<String>,
}

impl GenerationRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            request_id: None,
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: default_temperature(),
            role: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalOutputMode {
    Text,
    JsonObject,
}

#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub request_id: RequestId,
    /// `None` for both "no role" and unrecognized role names.
    pub role: Option<Role>,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub output_mode: CanonicalOutputMode,
    pub stream: bool,
}

impl CanonicalRequest {
    pub fn role_label(&self) -> &'static str {
        self.role.map(Role::as_str).unwrap_or("default")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(other) => other.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BackendRawEvent {
    OutputTextDelta { delta: String },
    Completed { finish_reason: FinishReason },
    Failed { error: GatewayError },
}

#[derive(Debug, Clone)]
pub struct EndpointIdentity {
    pub base_url: String,
    pub model: String,
}

pub type AdapterEventStream =
    Pin<Box<dyn Stream<Item = Result<BackendRawEvent, GatewayError>> + Send + 'static>>;
pub type AdapterCancelHandle = Arc<dyn Fn() + Send + Sync>;

pub struct AdapterInvocation {
    pub stream: AdapterEventStream,
    pub identity: EndpointIdentity,
    pub cancel: Option<AdapterCancelHandle>,
}

/// Lazy, finite, non-restartable sequence of completion fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send + 'static>>;
