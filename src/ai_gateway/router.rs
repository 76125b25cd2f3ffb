use std::collections::BTreeMap;

use crate::ai_gateway::{
    error::{GatewayError, invalid_request},
    types::{AIGatewayConfig, CredentialRef, EndpointConfig, EndpointOverride, Role},
};

/// Resolves which endpoint configuration a request talks to.
#[derive(Debug, Clone)]
pub struct EndpointRouter {
    default: EndpointConfig,
    roles: BTreeMap<Role, EndpointOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedEndpoint {
    pub label: &'static str,
    pub base_url: String,
    pub model: String,
    pub credential: CredentialRef,
}

impl EndpointRouter {
    pub fn new(config: &AIGatewayConfig) -> Result<Self, GatewayError> {
        if config.default.base_url.trim().is_empty() {
            return Err(invalid_request("ai_gateway.default.base_url must not be empty"));
        }
        if config.default.model.trim().is_empty() {
            return Err(invalid_request("ai_gateway.default.model must not be empty"));
        }

        Ok(Self {
            default: config.default.clone(),
            roles: config.roles.clone(),
        })
    }

    pub fn resolve(&self, role: Option<Role>) -> SelectedEndpoint {
        let Some(role) = role else {
            return SelectedEndpoint {
                label: "default",
                base_url: self.default.base_url.clone(),
                model: self.default.model.clone(),
                credential: self.default.credential.clone(),
            };
        };

        let overrides = self.roles.get(&role).cloned().unwrap_or_default();
        SelectedEndpoint {
            label: role.as_str(),
            base_url: non_blank(overrides.base_url)
                .unwrap_or_else(|| self.default.base_url.clone()),
            model: non_blank(overrides.model).unwrap_or_else(|| self.default.model.clone()),
            credential: overrides
                .credential
                .unwrap_or_else(|| self.default.credential.clone()),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
