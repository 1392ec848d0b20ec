use crate::message::TurnId;
use crate::phase::PhaseTransition;

/// Provider-agnostic assistant stream payload mapped into chat domain language.
///
/// A well-formed reply stream emits zero or more `TextDelta` items and ends
/// with exactly one of `ToolInvoked`, `Done`, or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantEvent {
    TextDelta(String),
    ToolInvoked(String),
    Done,
    Error(String),
}

impl AssistantEvent {
    /// Returns true when the event terminates its stream.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::TextDelta(_) => false,
            Self::ToolInvoked(_) | Self::Done | Self::Error(_) => true,
        }
    }
}

/// One assistant stream event routed to the turn that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnEvent {
    pub turn: TurnId,
    pub payload: AssistantEvent,
}

impl TurnEvent {
    /// Builds a routed event for one reply turn.
    pub fn new(turn: TurnId, payload: AssistantEvent) -> Self {
        Self { turn, payload }
    }

    /// Maps terminal payloads to session phase transitions.
    ///
    /// Delta payloads return `None` because they mutate transcript content,
    /// not the session lifecycle. `ToolInvoked` also returns `None`: the
    /// handoff path applies its own transition after the transcript swap.
    pub fn into_transition(self) -> Option<PhaseTransition> {
        match self.payload {
            AssistantEvent::TextDelta(_) | AssistantEvent::ToolInvoked(_) => None,
            AssistantEvent::Done | AssistantEvent::Error(_) => {
                Some(PhaseTransition::FinishStream(self.turn))
            }
        }
    }
}
