use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Notify, mpsc, oneshot};

use souk_chat::{AssistantEvent, TurnEvent, TurnId};

use crate::client::{
    AssistantClient, AssistantResult, AssistantSession, BoxFuture, ReplyStreamHandle, ReplyWorker,
    ScriptExhaustedSnafu, SessionInitSnafu, SessionProfile, UserTurn, make_event_stream,
};

/// One step in a scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Send one event to the widget.
    Emit(AssistantEvent),
    /// Park until the test calls [`ScriptedAssistant::release`].
    AwaitRelease,
}

/// Event sequence played back for one `stream_reply` call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    steps: Vec<ScriptedStep>,
}

impl ScriptedReply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delta(mut self, chunk: impl Into<String>) -> Self {
        self.steps
            .push(ScriptedStep::Emit(AssistantEvent::TextDelta(chunk.into())));
        self
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.steps
            .push(ScriptedStep::Emit(AssistantEvent::ToolInvoked(name.into())));
        self
    }

    pub fn error(mut self, detail: impl Into<String>) -> Self {
        self.steps
            .push(ScriptedStep::Emit(AssistantEvent::Error(detail.into())));
        self
    }

    pub fn done(mut self) -> Self {
        self.steps.push(ScriptedStep::Emit(AssistantEvent::Done));
        self
    }

    /// Inserts a pause so tests can interleave other work mid-stream.
    pub fn pause(mut self) -> Self {
        self.steps.push(ScriptedStep::AwaitRelease);
        self
    }
}

struct ScriptedState {
    replies: Mutex<VecDeque<ScriptedReply>>,
    last_open_profile: Mutex<Option<SessionProfile>>,
    last_user_turn: Mutex<Option<UserTurn>>,
    release: Notify,
    open_failures_remaining: AtomicUsize,
    open_calls: AtomicUsize,
    reply_calls: AtomicUsize,
}

/// Deterministic assistant double that replays queued reply scripts.
///
/// Every call is counted, so tests can assert that suppressed submits never
/// reach the assistant at all.
#[derive(Clone)]
pub struct ScriptedAssistant {
    state: Arc<ScriptedState>,
}

struct ScriptedSession {
    state: Arc<ScriptedState>,
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self::with_replies(Vec::new())
    }

    pub fn with_replies(replies: Vec<ScriptedReply>) -> Self {
        Self {
            state: Arc::new(ScriptedState {
                replies: Mutex::new(replies.into_iter().collect()),
                last_open_profile: Mutex::new(None),
                last_user_turn: Mutex::new(None),
                release: Notify::new(),
                open_failures_remaining: AtomicUsize::new(0),
                open_calls: AtomicUsize::new(0),
                reply_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Queues one more scripted reply.
    pub fn push_reply(&self, reply: ScriptedReply) {
        self.state
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Makes the next `count` session creations fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.state
            .open_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    /// Unparks one worker waiting on [`ScriptedReply::pause`].
    pub fn release(&self) {
        self.state.release.notify_one();
    }

    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    pub fn reply_calls(&self) -> usize {
        self.state.reply_calls.load(Ordering::SeqCst)
    }

    /// Profile captured by the most recent session creation.
    pub fn last_open_profile(&self) -> Option<SessionProfile> {
        self.state
            .last_open_profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Turn captured by the most recent `stream_reply` call.
    pub fn last_user_turn(&self) -> Option<UserTurn> {
        self.state
            .last_user_turn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for ScriptedAssistant {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedState {
    fn pop_reply(&self) -> Option<ScriptedReply> {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

async fn run_scripted_worker(
    state: Arc<ScriptedState>,
    reply: ScriptedReply,
    turn: TurnId,
    event_tx: mpsc::UnboundedSender<TurnEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    for step in reply.steps {
        match step {
            ScriptedStep::Emit(payload) => {
                if event_tx.send(TurnEvent::new(turn, payload)).is_err() {
                    return;
                }
            }
            ScriptedStep::AwaitRelease => {
                tokio::select! {
                    _ = &mut cancel_rx => return,
                    _ = state.release.notified() => {}
                }
            }
        }
    }
}

impl AssistantClient for ScriptedAssistant {
    fn open_session<'a>(
        &'a self,
        profile: SessionProfile,
    ) -> BoxFuture<'a, AssistantResult<Box<dyn AssistantSession>>> {
        let state = self.state.clone();
        Box::pin(async move {
            state.open_calls.fetch_add(1, Ordering::SeqCst);
            *state
                .last_open_profile
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(profile);

            let should_fail = state
                .open_failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return SessionInitSnafu {
                    stage: "scripted-open",
                    message: "scripted session create failure".to_string(),
                }
                .fail();
            }

            Ok(Box::new(ScriptedSession { state }) as Box<dyn AssistantSession>)
        })
    }
}

impl AssistantSession for ScriptedSession {
    fn stream_reply(&mut self, turn: UserTurn) -> AssistantResult<ReplyStreamHandle> {
        self.state.reply_calls.fetch_add(1, Ordering::SeqCst);
        let turn_id = turn.turn;
        *self
            .state
            .last_user_turn
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(turn);

        let Some(reply) = self.state.pop_reply() else {
            return ScriptExhaustedSnafu {
                stage: "scripted-stream-reply",
            }
            .fail();
        };

        let (event_tx, stream, cancel_rx) = make_event_stream(turn_id);
        let worker: ReplyWorker = Box::pin(run_scripted_worker(
            self.state.clone(),
            reply,
            turn_id,
            event_tx,
            cancel_rx,
        ));

        Ok(ReplyStreamHandle { stream, worker })
    }
}
