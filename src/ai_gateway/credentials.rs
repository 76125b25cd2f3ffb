use std::env;

use async_trait::async_trait;

use crate::ai_gateway::{
    error::{GatewayError, GatewayErrorKind, invalid_request},
    router::SelectedEndpoint,
    types::{CredentialRef, ResolvedCredential},
};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(
        &self,
        reference: &CredentialRef,
        endpoint: &SelectedEndpoint,
    ) -> Result<ResolvedCredential, GatewayError>;
}

#[derive(Default)]
pub struct EnvCredentialProvider;

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(
        &self,
        reference: &CredentialRef,
        endpoint: &SelectedEndpoint,
    ) -> Result<ResolvedCredential, GatewayError> {
        match reference {
            CredentialRef::Env { var } => {
                let token = env::var(var).map_err(|_| {
                    GatewayError::new(
                        GatewayErrorKind::Authentication,
                        format!(
                            "missing credential environment variable {} for endpoint {}",
                            var, endpoint.label
                        ),
                    )
                    .with_endpoint(endpoint.label)
                })?;

                Ok(bearer(&token))
            }
            CredentialRef::InlineToken { token } => {
                if token.trim().is_empty() {
                    return Err(invalid_request("inline credential token cannot be empty"));
                }
                Ok(bearer(token))
            }
            CredentialRef::None => Ok(ResolvedCredential::none()),
        }
    }
}

fn bearer(token: &str) -> ResolvedCredential {
    ResolvedCredential {
        auth_header: Some(format!("Bearer {}", token)),
        extra_headers: Vec::new(),
    }
}
