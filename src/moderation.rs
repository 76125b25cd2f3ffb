use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai_gateway::{gateway::CompletionGateway, types::Role, types_chat::GenerationRequest};

const MODERATION_TEMPERATURE: f32 = 0.3;
const LOGGED_INPUT_CHARS: usize = 100;

pub const DEFAULT_MODERATION_PROMPT: &str = "You are a content safety reviewer. Decide whether the \
player input contains unacceptable content: sexual content, extreme gore or abuse, or hate speech. \
The setting is post-apocalyptic survival, so moderate violence (zombies, combat, injuries) and \
ordinary emotional or interpersonal content are allowed. Reject only clear violations. Reply with \
a JSON object: {\"is_safe\": true|false, \"reason\": \"why the input was rejected, if it was\"}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub is_safe: bool,
    #[serde(default)]
    pub reason: String,
}

impl ModerationVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            reason: String::new(),
        }
    }
}

/// Pre-checks player input with the `moderator` role. Any failure of the
/// check itself lets the input through.
pub struct ContentModerator {
    gateway: Arc<CompletionGateway>,
    system_prompt: String,
}

impl ContentModerator {
    pub fn new(gateway: Arc<CompletionGateway>) -> Self {
        Self {
            gateway,
            system_prompt: DEFAULT_MODERATION_PROMPT.to_string(),
        }
    }

    pub async fn check(&self, input: &str) -> ModerationVerdict {
        if input.trim().is_empty() {
            return ModerationVerdict::safe();
        }

        let user_prompt = format!(
            "Review the following player input:\n<user_input>{}</user_input>\nReturn the verdict as JSON.",
            input
        );
        let request = GenerationRequest::new(self.system_prompt.clone(), user_prompt)
            .with_temperature(MODERATION_TEMPERATURE)
            .with_role(Role::Moderator.as_str());

        let value = match self.gateway.chat_structured_value(request).await {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(
                    target: "moderation",
                    kind = ?err.kind,
                    error = %err,
                    "moderation_failed_open"
                );
                return ModerationVerdict::safe();
            }
        };

        let verdict = verdict_from_value(&value);
        if !verdict.is_safe {
            let preview: String = input.chars().take(LOGGED_INPUT_CHARS).collect();
            tracing::warn!(
                target: "moderation",
                reason = %verdict.reason,
                input = %preview,
                "moderation_rejected_input"
            );
        }
        verdict
    }
}

// Missing or mistyped fields read as safe.
fn verdict_from_value(value: &Value) -> ModerationVerdict {
    ModerationVerdict {
        is_safe: value.get("is_safe").and_then(Value::as_bool).unwrap_or(true),
        reason: value
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}
