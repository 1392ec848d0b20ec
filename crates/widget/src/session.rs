use std::sync::Arc;

use snafu::Snafu;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use souk_assistant::{
    AssistantClient, AssistantSession, DEPOSIT_ESCALATION_TOOL, ReplyEventStream, SeedMessage,
    UserTurn, support_profile,
};
use souk_chat::{
    AssistantEvent, Message, MessageId, MessageKind, OffHoursGate, PhaseTransition, SessionPhase,
    StaffedHours, Transcript, TurnEvent, TurnId, local_hour, unix_now_seconds,
};

use crate::handoff::HandoffTimer;
use crate::notify::{StaffNotifier, deposit_support_alert};
use crate::settings::WidgetSettings;

/// Apology appended when the assistant session could not be created.
pub const ASSISTANT_UNAVAILABLE_APOLOGY: &str =
    "Sorry, I could not reach our assistant just now. Please send your message again in a moment.";

/// Notice appended when the assistant escalates to a human agent.
pub const HANDOFF_TRANSFER_NOTICE: &str = "I am bringing in a support teammate to sort out this \
     deposit. Hang tight, someone will pick this up shortly.";

/// Notice appended when no human agent picked up within the handoff window.
pub const HANDOFF_FALLBACK_NOTICE: &str = "All of our teammates are still busy at the moment. \
     You can email support@souk.example and we will follow up, or keep chatting with me here.";

/// Notice appended once per unstaffed period when the widget opens off-hours.
pub fn off_hours_notice(hours: &StaffedHours) -> String {
    format!(
        "Our support team is away right now. We are online daily from {:02}:00 to {:02}:00. \
         Our assistant can still help you in the meantime.",
        hours.opens_at_hour, hours.closes_at_hour
    )
}

/// Replacement text for a reply whose stream failed mid-flight.
pub fn stream_failure_notice(detail: &str) -> String {
    format!("Something went wrong while answering ({detail}). Please try again.")
}

/// One visitor submission: optional text plus an optional image attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInput {
    pub text: Option<String>,
    pub image: Option<ImageAttachment>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    fn normalized_text(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    }
}

/// Image payload carried as an opaque data URI; the widget never decodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub data_uri: String,
}

impl ImageAttachment {
    pub fn new(data_uri: impl Into<String>) -> Self {
        Self {
            data_uri: data_uri.into(),
        }
    }

    /// Decoded size estimate in bytes, without decoding the payload.
    pub fn estimated_bytes(&self) -> u64 {
        match self.data_uri.split_once(";base64,") {
            Some((_, payload)) => {
                let padding = payload
                    .bytes()
                    .rev()
                    .take_while(|byte| *byte == b'=')
                    .count() as u64;
                (payload.len() as u64 * 3 / 4).saturating_sub(padding)
            }
            None => self.data_uri.len() as u64,
        }
    }
}

/// What one submit call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A reply turn started; deltas will stream into the reserved message.
    TurnStarted(TurnId),
    /// The turn failed before streaming; the transcript carries failure text.
    TurnFailed,
    /// Logged only: a human handoff is pending and the assistant stays muted.
    HandoffPending,
    /// Logged only: a previous reply is still streaming.
    StreamBusy,
    /// Session creation failed; an apology was appended and the next submit
    /// retries creation.
    AssistantUnavailable,
    /// Nothing usable to send.
    EmptyInput,
    /// The session is closed; the input was dropped.
    SessionClosed,
}

#[derive(Debug, Snafu)]
pub enum SubmitError {
    #[snafu(display("attachment of {size_bytes} bytes exceeds the {limit_bytes} byte limit"))]
    AttachmentTooLarge {
        stage: &'static str,
        size_bytes: u64,
        limit_bytes: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct ActiveTurn {
    turn: TurnId,
    reserved_message_id: MessageId,
}

/// Mutable session state shared with the stream reader and the handoff timer.
struct SessionCore {
    transcript: Transcript,
    phase: SessionPhase,
    gate: OffHoursGate,
    active_turn: Option<ActiveTurn>,
    handoff_timer: Option<HandoffTimer>,
    next_turn: u64,
    handoff_generation: u64,
    settings: Arc<WidgetSettings>,
    changes: watch::Sender<u64>,
    revision: u64,
}

impl SessionCore {
    fn new(settings: Arc<WidgetSettings>, changes: watch::Sender<u64>) -> Self {
        Self {
            transcript: Transcript::new(),
            phase: SessionPhase::Idle,
            gate: OffHoursGate::new(),
            active_turn: None,
            handoff_timer: None,
            next_turn: 0,
            handoff_generation: 0,
            settings,
            changes,
            revision: 0,
        }
    }

    fn bump_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
        let _ = self.changes.send(self.revision);
    }

    fn alloc_turn_id(&mut self) -> TurnId {
        self.next_turn = self.next_turn.saturating_add(1);
        TurnId::new(self.next_turn)
    }

    fn note_open(&mut self, hour: u8) {
        let staffed = self.settings.staffed_hours;
        if self.gate.note_widget_opened(&staffed, hour) {
            self.transcript.append_agent_notice(off_hours_notice(&staffed));
            self.bump_revision();
            tracing::info!(hour, "off-hours notice shown");
        }
    }

    fn append_user(&mut self, text: Option<String>, image: Option<ImageAttachment>) {
        if let Some(text) = text {
            self.transcript.append_user_text(text);
        }
        if let Some(image) = image {
            self.transcript.append_user_image(image.data_uri);
        }
        self.bump_revision();
    }

    fn append_apology(&mut self) {
        self.transcript
            .append_agent_notice(ASSISTANT_UNAVAILABLE_APOLOGY);
        self.bump_revision();
    }

    /// Transcript copied into a new assistant session, taken before the
    /// current submission is appended.
    fn seed_snapshot(&self) -> Vec<SeedMessage> {
        self.transcript
            .messages()
            .iter()
            .map(|message| {
                let content = match message.kind {
                    MessageKind::Text => message.content.clone(),
                    MessageKind::Image => "[the customer attached an image]".to_string(),
                };
                SeedMessage::new(message.sender, content)
            })
            .collect()
    }

    fn apply_delta(&mut self, turn: TurnId, chunk: &str) -> bool {
        if !self.phase.accepts_turn_event(turn) {
            tracing::debug!(?turn, "dropping stale stream delta");
            return false;
        }
        let Some(active) = self.active_turn else {
            return false;
        };
        if self.transcript.append_delta(active.reserved_message_id, chunk) {
            self.bump_revision();
            return true;
        }
        false
    }

    fn finish_turn(&mut self, turn: TurnId) -> bool {
        if !self.phase.accepts_turn_event(turn) {
            tracing::debug!(?turn, "dropping stale stream completion");
            return false;
        }
        if let Ok(next) = self.phase.apply(PhaseTransition::FinishStream(turn)) {
            self.phase = next;
        }
        self.active_turn = None;
        self.bump_revision();
        true
    }

    fn fail_turn(&mut self, turn: TurnId, detail: &str) -> bool {
        if !self.phase.accepts_turn_event(turn) {
            tracing::debug!(?turn, "dropping stale stream failure");
            return false;
        }
        if let Some(active) = self.active_turn {
            self.transcript
                .replace_content(active.reserved_message_id, stream_failure_notice(detail));
        }
        if let Ok(next) = self.phase.apply(PhaseTransition::FinishStream(turn)) {
            self.phase = next;
        }
        self.active_turn = None;
        self.bump_revision();
        true
    }

    /// Escalates the active turn to a human handoff.
    ///
    /// Discards the partially streamed reply, appends the transfer notice and
    /// arms the fallback timer. Any previous timer is cancelled first, so at
    /// most one fallback can fire per handoff.
    async fn begin_handoff(core: &Arc<Mutex<SessionCore>>, turn: TurnId) -> bool {
        let mut guard = core.lock().await;
        if !guard.phase.accepts_turn_event(turn) {
            tracing::debug!(?turn, "dropping stale tool invocation");
            return false;
        }
        let next_phase = match guard.phase.apply(PhaseTransition::EnterHandoff(turn)) {
            Ok(next) => next,
            Err(rejection) => {
                tracing::warn!(?rejection, "handoff transition rejected");
                return false;
            }
        };
        let Some(active) = guard.active_turn else {
            return false;
        };

        guard.transcript.discard(active.reserved_message_id);
        guard.transcript.append_agent_notice(HANDOFF_TRANSFER_NOTICE);
        guard.phase = next_phase;
        guard.active_turn = None;

        guard.handoff_generation = guard.handoff_generation.wrapping_add(1);
        let generation = guard.handoff_generation;
        let timeout = guard.settings.handoff_timeout();
        if let Some(previous) = guard.handoff_timer.take() {
            previous.cancel();
        }
        let expiry_core = Arc::clone(core);
        guard.handoff_timer = Some(HandoffTimer::start(timeout, async move {
            expiry_core.lock().await.expire_handoff(generation);
        }));
        guard.bump_revision();
        tracing::info!(
            ?turn,
            timeout_seconds = timeout.as_secs(),
            "handoff requested, staff paged"
        );
        true
    }

    /// Runs when the handoff window lapses without a human pickup.
    fn expire_handoff(&mut self, generation: u64) {
        if self.handoff_generation != generation {
            tracing::debug!(generation, "stale handoff timer ignored");
            return;
        }
        if !self.phase.handoff_active() {
            return;
        }
        if let Ok(next) = self.phase.apply(PhaseTransition::ExpireHandoff) {
            self.phase = next;
        }
        self.transcript.append_agent_notice(HANDOFF_FALLBACK_NOTICE);
        self.handoff_timer = None;
        self.bump_revision();
        tracing::info!("handoff window lapsed, assistant resumed");
    }
}

/// One live support conversation between a visitor and the widget.
///
/// The session owns the transcript, the lifecycle phase and the assistant
/// session, and it drives reply streams through background tasks. All stream
/// events are re-checked against the active turn before they touch the
/// transcript, so events from cancelled or closed turns degrade to no-ops.
pub struct ChatSession {
    core: Arc<Mutex<SessionCore>>,
    settings: Arc<WidgetSettings>,
    assistant: Arc<dyn AssistantClient>,
    assistant_session: Option<Box<dyn AssistantSession>>,
    notifier: Arc<dyn StaffNotifier>,
    visitor_name: String,
    changes: watch::Receiver<u64>,
    stream_worker_task: Option<JoinHandle<()>>,
    stream_reader_task: Option<JoinHandle<()>>,
}

impl ChatSession {
    pub fn new(
        settings: Arc<WidgetSettings>,
        assistant: Arc<dyn AssistantClient>,
        notifier: Arc<dyn StaffNotifier>,
        visitor_name: impl Into<String>,
    ) -> Self {
        let (changes_tx, changes_rx) = watch::channel(0_u64);
        let core = SessionCore::new(settings.clone(), changes_tx);
        Self {
            core: Arc::new(Mutex::new(core)),
            settings,
            assistant,
            assistant_session: None,
            notifier,
            visitor_name: visitor_name.into(),
            changes: changes_rx,
            stream_worker_task: None,
            stream_reader_task: None,
        }
    }

    /// Records a widget-open event using the configured storefront clock.
    pub async fn open(&self) {
        let hour = local_hour(unix_now_seconds(), self.settings.utc_offset_minutes);
        self.open_at_local_hour(hour).await;
    }

    /// Records a widget-open event at an explicit local hour.
    ///
    /// Embedding shells that carry their own clock use this directly.
    pub async fn open_at_local_hour(&self, hour: u8) {
        let mut core = self.core.lock().await;
        if core.phase.is_closed() {
            tracing::warn!("widget reopened after close, ignoring");
            return;
        }
        core.note_open(hour);
    }

    /// Handles one visitor submission.
    ///
    /// Oversized attachments are rejected before anything is appended. Input
    /// submitted during a handoff or an active stream is logged without
    /// starting a new assistant turn.
    pub async fn submit(&mut self, input: UserInput) -> Result<SubmitOutcome, SubmitError> {
        let text = input.normalized_text();
        let image = input.image;

        if let Some(image) = &image {
            let size_bytes = image.estimated_bytes();
            let limit_bytes = self.settings.max_image_bytes;
            if size_bytes > limit_bytes {
                tracing::warn!(size_bytes, limit_bytes, "attachment rejected");
                return AttachmentTooLargeSnafu {
                    stage: "submit-attachment-guard",
                    size_bytes,
                    limit_bytes,
                }
                .fail();
            }
        }
        if text.is_none() && image.is_none() {
            return Ok(SubmitOutcome::EmptyInput);
        }

        let seed = {
            let mut core = self.core.lock().await;
            if core.phase.is_closed() {
                tracing::warn!("submit ignored, widget session is closed");
                return Ok(SubmitOutcome::SessionClosed);
            }

            let seed = if self.assistant_session.is_none() {
                Some(core.seed_snapshot())
            } else {
                None
            };
            core.append_user(text.clone(), image.clone());

            if core.phase.handoff_active() {
                tracing::info!("handoff pending, assistant muted for this message");
                return Ok(SubmitOutcome::HandoffPending);
            }
            if matches!(core.phase, SessionPhase::Streaming(_)) {
                tracing::info!("reply stream in flight, message logged without a new turn");
                return Ok(SubmitOutcome::StreamBusy);
            }
            seed
        };

        if self.assistant_session.is_none() {
            let profile = support_profile(seed.unwrap_or_default());
            match self.assistant.open_session(profile).await {
                Ok(opened) => self.assistant_session = Some(opened),
                Err(error) => {
                    tracing::warn!(error = %error, "assistant session creation failed");
                    self.core.lock().await.append_apology();
                    return Ok(SubmitOutcome::AssistantUnavailable);
                }
            }
        }
        let Some(assistant_session) = self.assistant_session.as_mut() else {
            return Ok(SubmitOutcome::AssistantUnavailable);
        };

        let turn = {
            let mut core = self.core.lock().await;
            let turn = core.alloc_turn_id();
            let next_phase = match core.phase.apply(PhaseTransition::StartStream(turn)) {
                Ok(next) => next,
                Err(rejection) => {
                    tracing::warn!(?rejection, "could not start a reply turn");
                    return Ok(SubmitOutcome::StreamBusy);
                }
            };
            core.phase = next_phase;
            let reserved_message_id = core.transcript.reserve_agent_reply();
            core.active_turn = Some(ActiveTurn {
                turn,
                reserved_message_id,
            });
            core.bump_revision();
            turn
        };

        let mut user_turn = UserTurn::new(turn, text);
        if image.is_some() {
            user_turn = user_turn.with_image();
        }

        let handle = match assistant_session.stream_reply(user_turn) {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(error = %error, "reply request failed before streaming");
                self.core.lock().await.fail_turn(turn, &error.to_string());
                return Ok(SubmitOutcome::TurnFailed);
            }
        };

        self.stream_worker_task = Some(tokio::spawn(handle.worker));
        self.stream_reader_task = Some(tokio::spawn(run_stream_reader(
            Arc::clone(&self.core),
            handle.stream,
            Arc::clone(&self.notifier),
            self.visitor_name.clone(),
        )));

        Ok(SubmitOutcome::TurnStarted(turn))
    }

    /// Closes the session; later input and stream events are dropped.
    pub async fn close(&mut self) {
        {
            let mut core = self.core.lock().await;
            if core.phase.is_closed() {
                return;
            }
            if let Ok(next) = core.phase.apply(PhaseTransition::Close) {
                core.phase = next;
            }
            if let Some(timer) = core.handoff_timer.take() {
                timer.cancel();
            }
            core.active_turn = None;
            core.bump_revision();
        }
        if let Some(task) = self.stream_reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stream_worker_task.take() {
            task.abort();
        }
        tracing::info!("widget session closed");
    }

    /// Waits for any in-flight reply processing to finish.
    pub async fn settled(&mut self) {
        if let Some(task) = self.stream_reader_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.stream_worker_task.take() {
            let _ = task.await;
        }
    }

    pub async fn transcript_snapshot(&self) -> Vec<Message> {
        self.core.lock().await.transcript.messages().to_vec()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.core.lock().await.phase
    }

    pub async fn handoff_active(&self) -> bool {
        self.core.lock().await.phase.handoff_active()
    }

    pub async fn is_closed(&self) -> bool {
        self.core.lock().await.phase.is_closed()
    }

    /// Change feed for rendering layers; the value is a monotonic revision.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(task) = self.stream_reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stream_worker_task.take() {
            task.abort();
        }
    }
}

/// Applies one reply stream to the session until a terminal event.
///
/// A deposit escalation pages staff outside the core lock and cancels the
/// rest of the stream. Unknown tool names are logged and skipped.
async fn run_stream_reader(
    core: Arc<Mutex<SessionCore>>,
    mut stream: ReplyEventStream,
    notifier: Arc<dyn StaffNotifier>,
    visitor_name: String,
) {
    while let Some(event) = stream.recv().await {
        let TurnEvent { turn, payload } = event;
        match payload {
            AssistantEvent::TextDelta(chunk) => {
                core.lock().await.apply_delta(turn, &chunk);
            }
            AssistantEvent::ToolInvoked(name) => {
                if name != DEPOSIT_ESCALATION_TOOL {
                    tracing::warn!(tool = %name, "ignoring unknown tool invocation");
                    continue;
                }
                if SessionCore::begin_handoff(&core, turn).await {
                    notifier.notify(&deposit_support_alert(&visitor_name));
                    stream.cancel();
                    break;
                }
            }
            AssistantEvent::Done => {
                core.lock().await.finish_turn(turn);
            }
            AssistantEvent::Error(detail) => {
                core.lock().await.fail_turn(turn, &detail);
            }
        }
    }

    // A stream that vanished without a terminal event still ends its turn.
    let turn = stream.turn();
    let mut core = core.lock().await;
    if core.phase.accepts_turn_event(turn) {
        tracing::warn!(?turn, "reply stream ended without a terminal event");
        core.fail_turn(turn, "reply stream ended unexpectedly");
    }
}
