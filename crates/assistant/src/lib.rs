#![deny(unsafe_code)]

use std::sync::Arc;

/// Session and stream contracts between the widget and any assistant backend.
pub mod client;
/// Fixed system instruction and tool declarations.
pub mod prompts;
pub mod rig_adapter;
/// Deterministic playback double for tests and QA scenarios.
pub mod scripted;

pub use client::{
    AssistantClient, AssistantConfig, AssistantError, AssistantResult, AssistantSession, BoxFuture,
    ReplyEventStream, ReplyStreamHandle, ReplyWorker, SeedMessage, SessionProfile, ToolSpec,
    UserTurn,
};
pub use prompts::{
    DEPOSIT_ESCALATION_TOOL, SUPPORT_SYSTEM_INSTRUCTION, deposit_escalation_tool, support_profile,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigAssistantClient};
pub use scripted::{ScriptedAssistant, ScriptedReply, ScriptedStep};

/// Builds the assistant client for a configured provider.
pub fn create_assistant_client(
    mut config: AssistantConfig,
) -> AssistantResult<Arc<dyn AssistantClient>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigAssistantClient::new(config)))
        }
        _ => Err(AssistantError::UnsupportedProvider {
            stage: "create-assistant-client",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_provider_id_defaults_to_openai() {
        let client = create_assistant_client(AssistantConfig::new("", "key", "", "gpt-4o-mini"));
        assert!(client.is_ok());
    }

    #[test]
    fn unknown_provider_id_is_rejected() {
        let result =
            create_assistant_client(AssistantConfig::new("acme-llm", "key", "", "gpt-4o-mini"));
        assert!(matches!(
            result,
            Err(AssistantError::UnsupportedProvider { .. })
        ));
    }
}
