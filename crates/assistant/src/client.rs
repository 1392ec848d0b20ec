use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use souk_chat::{Sender, TurnEvent, TurnId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
}

impl AssistantConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model: model.into().trim().to_string(),
        }
    }
}

/// One prior transcript turn handed to a newly created session as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedMessage {
    pub sender: Sender,
    pub content: String,
}

impl SeedMessage {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
        }
    }
}

/// Declaration for one callable tool.
///
/// The support widget declares exactly one, with no parameters; the provider
/// adapter turns this into whatever schema its wire format wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Everything required to create one assistant session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub system_instruction: String,
    pub tools: Vec<ToolSpec>,
    pub seed: Vec<SeedMessage>,
}

/// Visitor input for one reply turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTurn {
    pub turn: TurnId,
    pub text: Option<String>,
    pub image_attached: bool,
}

impl UserTurn {
    pub fn new(turn: TurnId, text: Option<String>) -> Self {
        Self {
            turn,
            text,
            image_attached: false,
        }
    }

    pub fn with_image(mut self) -> Self {
        self.image_attached = true;
        self
    }

    /// Returns true when the turn carries neither usable text nor an image.
    pub fn is_empty(&self) -> bool {
        let text_empty = self
            .text
            .as_deref()
            .is_none_or(|text| text.trim().is_empty());
        text_empty && !self.image_attached
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ReplyWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type AssistantResult<T> = Result<T, AssistantError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AssistantError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("could not create assistant session on `{stage}`: {message}"))]
    SessionInit {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("reply request for {turn:?} carries no content"))]
    EmptyTurn { stage: &'static str, turn: TurnId },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("scripted assistant ran out of replies on `{stage}`"))]
    ScriptExhausted { stage: &'static str },
}

/// Finite event stream for one reply turn.
///
/// Dropping the stream signals cancellation to the worker driving it.
pub struct ReplyEventStream {
    turn: TurnId,
    events: mpsc::UnboundedReceiver<TurnEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct ReplyStreamHandle {
    pub stream: ReplyEventStream,
    pub worker: ReplyWorker,
}

impl ReplyEventStream {
    pub(crate) fn new(
        turn: TurnId,
        events: mpsc::UnboundedReceiver<TurnEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            turn,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn turn(&self) -> TurnId {
        self.turn
    }

    pub async fn recv(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TurnEvent> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ReplyEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Factory boundary for assistant sessions.
///
/// `open_session` may fail (bad credentials, unreachable provider); the
/// widget reports the failure and retries on the visitor's next submit.
pub trait AssistantClient: Send + Sync {
    fn open_session<'a>(
        &'a self,
        profile: SessionProfile,
    ) -> BoxFuture<'a, AssistantResult<Box<dyn AssistantSession>>>;
}

/// One live conversation with reply context carried between turns.
pub trait AssistantSession: Send {
    fn stream_reply(&mut self, turn: UserTurn) -> AssistantResult<ReplyStreamHandle>;
}

pub(crate) fn make_event_stream(
    turn: TurnId,
) -> (
    mpsc::UnboundedSender<TurnEvent>,
    ReplyEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ReplyEventStream::new(turn, event_rx, cancel_tx),
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use souk_chat::AssistantEvent;

    #[test]
    fn config_constructor_trims_fields() {
        let config = AssistantConfig::new(" openai ", " key ", " https://api.example.test ", " m1 ");
        assert_eq!(config.provider_id, "openai");
        assert_eq!(config.api_key, "key");
        assert_eq!(config.endpoint, "https://api.example.test");
        assert_eq!(config.model, "m1");
    }

    #[test]
    fn user_turn_emptiness_accounts_for_images() {
        let turn = TurnId::new(1);
        assert!(UserTurn::new(turn, None).is_empty());
        assert!(UserTurn::new(turn, Some("   ".into())).is_empty());
        assert!(!UserTurn::new(turn, Some("hello".into())).is_empty());
        assert!(!UserTurn::new(turn, None).with_image().is_empty());
    }

    #[tokio::test]
    async fn stream_delivers_events_in_send_order() {
        let turn = TurnId::new(3);
        let (event_tx, mut stream, _cancel_rx) = make_event_stream(turn);

        for payload in [
            AssistantEvent::TextDelta("a".into()),
            AssistantEvent::TextDelta("b".into()),
            AssistantEvent::Done,
        ] {
            event_tx
                .send(TurnEvent::new(turn, payload))
                .expect("receiver alive");
        }
        drop(event_tx);

        assert_eq!(
            stream.recv().await.map(|event| event.payload),
            Some(AssistantEvent::TextDelta("a".into()))
        );
        assert_eq!(
            stream.recv().await.map(|event| event.payload),
            Some(AssistantEvent::TextDelta("b".into()))
        );
        assert_eq!(
            stream.recv().await.map(|event| event.payload),
            Some(AssistantEvent::Done)
        );
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn dropping_the_stream_signals_cancellation() {
        let turn = TurnId::new(4);
        let (_event_tx, stream, cancel_rx) = make_event_stream(turn);

        drop(stream);
        assert!(cancel_rx.await.is_ok());
    }
}
