use crate::message::{Message, MessageId, unix_now_seconds};

/// Append-only conversation log for one widget session.
///
/// Messages keep insertion order for the life of the session. The only
/// mutations after append are in-place content patches on a streaming
/// placeholder and the single discard path used when a tool invocation
/// supersedes a partial reply.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    next_message_id: u64,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_message_id: 0,
        }
    }

    fn alloc_message_id(&mut self) -> MessageId {
        self.next_message_id = self.next_message_id.saturating_add(1);
        MessageId::new(self.next_message_id)
    }

    fn push(&mut self, message: Message) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// Appends a visitor text message and returns its id.
    pub fn append_user_text(&mut self, content: impl Into<String>) -> MessageId {
        let id = self.alloc_message_id();
        self.push(Message::user_text(id, content, unix_now_seconds()))
    }

    /// Appends a visitor image message and returns its id.
    ///
    /// Size enforcement happens before this call; the transcript stores the
    /// data URI as-is.
    pub fn append_user_image(&mut self, data_uri: impl Into<String>) -> MessageId {
        let id = self.alloc_message_id();
        self.push(Message::user_image(id, data_uri, unix_now_seconds()))
    }

    /// Appends a finished agent message (notice, apology, transfer text).
    pub fn append_agent_notice(&mut self, content: impl Into<String>) -> MessageId {
        let id = self.alloc_message_id();
        self.push(Message::agent_notice(id, content, unix_now_seconds()))
    }

    /// Appends an empty agent placeholder for an incoming streamed reply.
    pub fn reserve_agent_reply(&mut self) -> MessageId {
        let id = self.alloc_message_id();
        self.push(Message::agent_streaming(id, unix_now_seconds()))
    }

    /// Concatenates a stream chunk onto an existing message.
    ///
    /// Returns false without any other effect when the id is unknown, so late
    /// chunks for discarded or foreign messages degrade to no-ops.
    pub fn append_delta(&mut self, id: MessageId, chunk: &str) -> bool {
        match self.find_mut(id) {
            Some(message) => {
                message.content.push_str(chunk);
                true
            }
            None => false,
        }
    }

    /// Replaces the full content of an existing message.
    ///
    /// Used to turn a reserved streaming placeholder into a failure notice.
    /// Returns false when the id is unknown.
    pub fn replace_content(&mut self, id: MessageId, content: impl Into<String>) -> bool {
        match self.find_mut(id) {
            Some(message) => {
                message.content = content.into();
                true
            }
            None => false,
        }
    }

    /// Removes a message from the log.
    ///
    /// The single caller is the tool-invocation path that supersedes a
    /// partially streamed reply. Returns false when the id is unknown.
    pub fn discard(&mut self, id: MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|message| message.id != id);
        self.messages.len() != before
    }

    /// All messages in insertion order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Looks up one message by id.
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    /// Most recently appended message, if any.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Sender;

    #[test]
    fn appends_keep_insertion_order_and_unique_ids() {
        let mut transcript = Transcript::new();
        let first = transcript.append_user_text("first");
        let second = transcript.append_agent_notice("second");
        let third = transcript.append_user_image("data:image/png;base64,QUJD");

        let ids = transcript
            .messages()
            .iter()
            .map(|message| message.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![first, second, third]);
        assert!(first < second && second < third);
    }

    #[test]
    fn delta_concatenation_preserves_chunk_order() {
        let mut transcript = Transcript::new();
        let reply = transcript.reserve_agent_reply();

        assert!(transcript.append_delta(reply, "Your refund "));
        assert!(transcript.append_delta(reply, "is on "));
        assert!(transcript.append_delta(reply, "its way."));

        let message = transcript.get(reply).unwrap();
        assert_eq!(message.content, "Your refund is on its way.");
        assert_eq!(message.sender, Sender::Agent);
    }

    #[test]
    fn patching_unknown_id_is_a_no_op() {
        let mut transcript = Transcript::new();
        let existing = transcript.append_user_text("hello");

        assert!(!transcript.append_delta(MessageId::new(999), "late chunk"));
        assert!(!transcript.replace_content(MessageId::new(999), "replacement"));
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.get(existing).unwrap().content, "hello");
    }

    #[test]
    fn discard_removes_only_the_target_message() {
        let mut transcript = Transcript::new();
        let keep = transcript.append_user_text("keep me");
        let drop = transcript.reserve_agent_reply();
        transcript.append_delta(drop, "partial reply te");

        assert!(transcript.discard(drop));
        assert!(!transcript.discard(drop));
        assert_eq!(transcript.len(), 1);
        assert!(transcript.get(keep).is_some());
        assert!(transcript.get(drop).is_none());
    }

    #[test]
    fn replace_content_overwrites_partial_text() {
        let mut transcript = Transcript::new();
        let reply = transcript.reserve_agent_reply();
        transcript.append_delta(reply, "half a sent");

        assert!(transcript.replace_content(reply, "Something went wrong."));
        assert_eq!(transcript.get(reply).unwrap().content, "Something went wrong.");
    }
}
