use uuid::Uuid;

use crate::ai_gateway::{
    error::{GatewayError, invalid_request},
    types::Role,
    types_chat::{CanonicalOutputMode, CanonicalRequest, GenerationRequest},
};

#[derive(Default, Clone, Copy)]
pub struct RequestNormalizer;

impl RequestNormalizer {
    pub fn normalize(
        &self,
        request: GenerationRequest,
        output_mode: CanonicalOutputMode,
        stream: bool,
    ) -> Result<CanonicalRequest, GatewayError> {
        if request.user_prompt.trim().is_empty() {
            return Err(invalid_request("user_prompt must not be empty"));
        }
        if !request.temperature.is_finite() {
            return Err(invalid_request("temperature must be a finite number"));
        }

        let role = match request.role.as_deref() {
            None => None,
            Some(name) => {
                let parsed = Role::parse(name);
                if parsed.is_none() {
                    tracing::warn!(
                        target: "ai_gateway",
                        role = %name,
                        "unknown_role_uses_default_endpoint"
                    );
                }
                parsed
            }
        };

        let request_id = request
            .request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        Ok(CanonicalRequest {
            request_id,
            role,
            system_prompt: request.system_prompt,
            user_prompt: request.user_prompt,
            temperature: request.temperature,
            output_mode,
            stream,
        })
    }
}
