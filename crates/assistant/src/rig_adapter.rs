use std::sync::Arc;

use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage, ToolDefinition};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{RwLock, mpsc, oneshot};

use souk_chat::{AssistantEvent, Sender, TurnEvent, TurnId};

use crate::client::{
    AssistantClient, AssistantConfig, AssistantResult, AssistantSession, BoxFuture,
    CompletionsFailedSnafu, EmptyTurnSnafu, HttpClientSnafu, MissingApiKeySnafu, ReplyStreamHandle,
    ReplyWorker, SeedMessage, SessionProfile, ToolSpec, UserTurn, make_event_stream,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

type RigStreamChunk = rig::providers::openai::responses_api::streaming::StreamingCompletionResponse;
type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<RigStreamChunk>;

/// Session factory over Rig's OpenAI-compatible completion client.
pub struct RigAssistantClient {
    config: AssistantConfig,
}

/// Per-session request shape shared with reply workers.
struct RigSessionContext {
    config: AssistantConfig,
    preamble: String,
    tools: Vec<ToolDefinition>,
}

/// One live provider conversation.
///
/// History is shared with the reply workers; a turn's reply is recorded only
/// after it completes cleanly, so superseded or failed replies leave no trace
/// in later context.
pub struct RigAssistantSession {
    context: Arc<RigSessionContext>,
    history: Arc<RwLock<Vec<RigMessage>>>,
}

impl RigAssistantClient {
    pub fn new(config: AssistantConfig) -> Self {
        Self { config }
    }

    fn build_client(config: &AssistantConfig) -> AssistantResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn seed_to_rig_message(message: &SeedMessage) -> RigMessage {
        match message.sender {
            Sender::User => RigMessage::user(message.content.clone()),
            Sender::Agent => RigMessage::assistant(message.content.clone()),
        }
    }

    fn tool_definition(spec: &ToolSpec) -> ToolDefinition {
        ToolDefinition {
            name: spec.name.clone(),
            description: spec.description.clone(),
            // The escalation tool takes no arguments; the schema stays an
            // empty object so OpenAI-compatible backends accept it.
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
            }),
        }
    }
}

impl AssistantClient for RigAssistantClient {
    fn open_session<'a>(
        &'a self,
        profile: SessionProfile,
    ) -> BoxFuture<'a, AssistantResult<Box<dyn AssistantSession>>> {
        Box::pin(async move {
            ensure!(
                !self.config.api_key.is_empty(),
                MissingApiKeySnafu {
                    stage: "open-session",
                    provider_id: self.config.provider_id.clone(),
                }
            );

            // Client construction is probed here so a bad endpoint surfaces
            // at session create instead of on the first reply.
            let _ = Self::build_client(&self.config)?;

            let history = profile
                .seed
                .iter()
                .map(Self::seed_to_rig_message)
                .collect::<Vec<_>>();
            let tools = profile.tools.iter().map(Self::tool_definition).collect();

            tracing::info!(
                provider_id = %self.config.provider_id,
                model_id = %self.config.model,
                seed_message_count = history.len(),
                "assistant session opened"
            );

            let session = RigAssistantSession {
                context: Arc::new(RigSessionContext {
                    config: self.config.clone(),
                    preamble: profile.system_instruction,
                    tools,
                }),
                history: Arc::new(RwLock::new(history)),
            };
            Ok(Box::new(session) as Box<dyn AssistantSession>)
        })
    }
}

impl RigAssistantSession {
    fn render_user_turn(turn: &UserTurn) -> String {
        let mut rendered = turn.text.clone().unwrap_or_default();
        if turn.image_attached {
            if !rendered.is_empty() {
                rendered.push('\n');
            }
            rendered.push_str("[the customer attached an image]");
        }
        rendered
    }

    async fn open_stream(
        context: &RigSessionContext,
        turn: TurnId,
        mut messages: Vec<RigMessage>,
    ) -> AssistantResult<RigStreamingResponse> {
        let client = RigAssistantClient::build_client(&context.config)?;
        let model = client.completion_model(context.config.model.as_str());

        let Some(prompt) = messages.pop() else {
            return EmptyTurnSnafu {
                stage: "open-stream-pop-prompt",
                turn,
            }
            .fail();
        };

        let mut builder = model
            .completion_request(prompt)
            .messages(messages)
            .preamble(context.preamble.clone());
        for tool in &context.tools {
            builder = builder.tool(tool.clone());
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
        turn: TurnId,
        error: crate::client::AssistantError,
    ) {
        let _ = event_tx.send(TurnEvent::new(turn, AssistantEvent::Error(error.to_string())));
    }

    fn map_stream_item<R>(turn: TurnId, item: StreamedAssistantContent<R>) -> Option<TurnEvent>
    where
        R: Clone + Unpin,
    {
        let payload = match item {
            StreamedAssistantContent::Text(text) => AssistantEvent::TextDelta(text.text),
            StreamedAssistantContent::ToolCall { tool_call, .. } => {
                AssistantEvent::ToolInvoked(tool_call.function.name)
            }
            // Support replies never surface model reasoning; partial tool
            // argument chunks are irrelevant for a no-argument tool.
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => return None,
        };

        Some(TurnEvent::new(turn, payload))
    }

    async fn run_reply_worker(
        context: Arc<RigSessionContext>,
        history: Arc<RwLock<Vec<RigMessage>>>,
        turn: UserTurn,
        event_tx: mpsc::UnboundedSender<TurnEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let turn_id = turn.turn;
        let rendered = Self::render_user_turn(&turn);
        history.write().await.push(RigMessage::user(rendered));
        let snapshot = history.read().await.clone();

        let mut stream = match Self::open_stream(&context, turn_id, snapshot).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    turn = ?turn_id,
                    provider_id = %context.config.provider_id,
                    model_id = %context.config.model,
                    error = %error,
                    "failed to open assistant reply stream"
                );
                Self::emit_error_event(&event_tx, turn_id, error);
                return;
            }
        };

        let mut reply_text = String::new();
        let mut cancelled = false;
        let mut stream_failed = false;
        let mut tool_invoked = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    // Cancel the upstream Rig stream so provider IO stops promptly.
                    tracing::debug!(turn = ?turn_id, "assistant reply stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            let Some(event) = Self::map_stream_item(turn_id, item) else {
                                continue;
                            };
                            match &event.payload {
                                AssistantEvent::TextDelta(chunk) => reply_text.push_str(chunk),
                                AssistantEvent::ToolInvoked(name) => {
                                    tool_invoked = true;
                                    tracing::info!(
                                        turn = ?turn_id,
                                        tool = %name,
                                        "assistant invoked a tool; reply turn ends here"
                                    );
                                }
                                AssistantEvent::Done | AssistantEvent::Error(_) => {}
                            }
                            if event_tx.send(event).is_err() {
                                return;
                            }
                            if tool_invoked {
                                stream.cancel();
                                break;
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                turn = ?turn_id,
                                error = %source,
                                "assistant stream emitted an error chunk"
                            );
                            let error = crate::client::AssistantError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(&event_tx, turn_id, error);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !stream_failed && !tool_invoked {
            // Only clean completions become context for later turns.
            if !reply_text.is_empty() {
                history.write().await.push(RigMessage::assistant(reply_text));
            }
            let _ = event_tx.send(TurnEvent::new(turn_id, AssistantEvent::Done));
        }
    }
}

impl AssistantSession for RigAssistantSession {
    fn stream_reply(&mut self, turn: UserTurn) -> AssistantResult<ReplyStreamHandle> {
        ensure!(
            !turn.is_empty(),
            EmptyTurnSnafu {
                stage: "stream-reply",
                turn: turn.turn,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(turn.turn);
        let worker: ReplyWorker = Box::pin(Self::run_reply_worker(
            self.context.clone(),
            self.history.clone(),
            turn,
            event_tx,
            cancel_rx,
        ));

        Ok(ReplyStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definition_declares_an_empty_object_schema() {
        let definition = RigAssistantClient::tool_definition(&ToolSpec::new(
            "deposit-escalation",
            "Escalate deposit problems.",
        ));
        assert_eq!(definition.name, "deposit-escalation");
        assert_eq!(
            definition.parameters,
            serde_json::json!({ "type": "object", "properties": {} })
        );
    }

    #[test]
    fn rendered_turn_appends_the_attachment_note() {
        let text_only = UserTurn::new(TurnId::new(1), Some("my deposit failed".into()));
        assert_eq!(
            RigAssistantSession::render_user_turn(&text_only),
            "my deposit failed"
        );

        let with_image = UserTurn::new(TurnId::new(2), Some("receipt attached".into())).with_image();
        assert_eq!(
            RigAssistantSession::render_user_turn(&with_image),
            "receipt attached\n[the customer attached an image]"
        );

        let image_only = UserTurn::new(TurnId::new(3), None).with_image();
        assert_eq!(
            RigAssistantSession::render_user_turn(&image_only),
            "[the customer attached an image]"
        );
    }

    #[test]
    fn seed_history_maps_senders_to_rig_roles() {
        let user = RigAssistantClient::seed_to_rig_message(&SeedMessage::new(
            Sender::User,
            "my top-up bounced",
        ));
        assert_eq!(user, RigMessage::user("my top-up bounced"));

        let agent = RigAssistantClient::seed_to_rig_message(&SeedMessage::new(
            Sender::Agent,
            "let me check that",
        ));
        assert_eq!(agent, RigMessage::assistant("let me check that"));
    }

    #[test]
    fn text_chunks_map_to_transcript_deltas() {
        let turn = TurnId::new(9);
        let mapped = RigAssistantSession::map_stream_item::<RigStreamChunk>(
            turn,
            StreamedAssistantContent::Text(rig::message::Text {
                text: "chunk".into(),
            }),
        );
        assert_eq!(
            mapped.map(|event| event.payload),
            Some(AssistantEvent::TextDelta("chunk".into()))
        );
    }
}
