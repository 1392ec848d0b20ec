use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identifier for one transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one assistant reply turn.
///
/// This must change on every submit so stale stream events can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl TurnId {
    /// Creates a typed turn identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Transcript speaker.
///
/// `Agent` covers the automated assistant and widget-authored notices alike;
/// visitors never see which one produced a given bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Agent,
}

/// Payload category for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Image,
}

/// Core message model.
///
/// Image messages carry an opaque data URI in `content`; the transcript never
/// inspects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub kind: MessageKind,
    pub content: String,
    pub sent_at_unix_seconds: u64,
}

impl Message {
    /// Creates a message with explicit sender and kind.
    pub fn new(
        id: MessageId,
        sender: Sender,
        kind: MessageKind,
        content: impl Into<String>,
        sent_at_unix_seconds: u64,
    ) -> Self {
        Self {
            id,
            sender,
            kind,
            content: content.into(),
            sent_at_unix_seconds,
        }
    }

    /// Creates a visitor text message.
    pub fn user_text(id: MessageId, content: impl Into<String>, sent_at_unix_seconds: u64) -> Self {
        Self::new(id, Sender::User, MessageKind::Text, content, sent_at_unix_seconds)
    }

    /// Creates a visitor image message from an already validated data URI.
    pub fn user_image(
        id: MessageId,
        data_uri: impl Into<String>,
        sent_at_unix_seconds: u64,
    ) -> Self {
        Self::new(id, Sender::User, MessageKind::Image, data_uri, sent_at_unix_seconds)
    }

    /// Creates a finished agent-side message, such as a notice or apology.
    pub fn agent_notice(
        id: MessageId,
        content: impl Into<String>,
        sent_at_unix_seconds: u64,
    ) -> Self {
        Self::new(id, Sender::Agent, MessageKind::Text, content, sent_at_unix_seconds)
    }

    /// Creates an empty agent placeholder that an active stream fills in.
    pub fn agent_streaming(id: MessageId, sent_at_unix_seconds: u64) -> Self {
        Self::new(id, Sender::Agent, MessageKind::Text, String::new(), sent_at_unix_seconds)
    }

    /// Returns true when the message came from the visitor.
    pub fn is_from_user(&self) -> bool {
        self.sender == Sender::User
    }
}

/// Current wall-clock time as unix seconds, saturating to zero before the epoch.
pub fn unix_now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_u64, |duration| duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_sender_and_kind() {
        let text = Message::user_text(MessageId::new(1), "hello", 100);
        assert_eq!(text.sender, Sender::User);
        assert_eq!(text.kind, MessageKind::Text);
        assert_eq!(text.content, "hello");

        let image = Message::user_image(MessageId::new(2), "data:image/png;base64,AAAA", 101);
        assert_eq!(image.kind, MessageKind::Image);
        assert!(image.is_from_user());

        let reserved = Message::agent_streaming(MessageId::new(3), 102);
        assert_eq!(reserved.sender, Sender::Agent);
        assert!(reserved.content.is_empty());
    }
}
