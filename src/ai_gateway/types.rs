use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

pub type RequestId = String;

/// Named endpoint configurations a request may select.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Narrator,
    Judge,
    Ending,
    Moderator,
}

impl Role {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "narrator" => Some(Role::Narrator),
            "judge" => Some(Role::Judge),
            "ending" => Some(Role::Ending),
            "moderator" => Some(Role::Moderator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Narrator => "narrator",
            Role::Judge => "judge",
            Role::Ending => "ending",
            Role::Moderator => "moderator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRef {
    Env { var: String },
    InlineToken { token: String },
    None,
}

#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub auth_header: Option<String>,
    pub extra_headers: Vec<(String, String)>,
}

impl ResolvedCredential {
    pub fn none() -> Self {
        Self {
            auth_header: None,
            extra_headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_credential")]
    pub credential: CredentialRef,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            credential: default_credential(),
        }
    }
}

/// Per-role override; every unset (or blank) field falls back to the default
/// endpoint independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointOverride {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub credential: Option<CredentialRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_temperature_step")]
    pub temperature_step: f32,
    #[serde(default = "default_min_temperature")]
    pub min_temperature: f32,
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            temperature_step: default_temperature_step(),
            min_temperature: default_min_temperature(),
            max_temperature: default_max_temperature(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AIGatewayConfig {
    #[serde(default)]
    pub default: EndpointConfig,
    #[serde(default)]
    pub roles: BTreeMap<Role, EndpointOverride>,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_credential() -> CredentialRef {
    CredentialRef::Env {
        var: "OPENAI_API_KEY".to_string(),
    }
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_temperature_step() -> f32 {
    0.1
}

fn default_min_temperature() -> f32 {
    0.0
}

fn default_max_temperature() -> f32 {
    2.0
}
