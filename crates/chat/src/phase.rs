use crate::message::TurnId;

/// Lifecycle phase for one widget session.
///
/// `HandoffPending` means a human agent was paged and the assistant is muted;
/// whether the session shows a handoff banner is derived from this phase, not
/// stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Streaming(TurnId),
    HandoffPending,
    Closed,
}

/// State transition input for the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    StartStream(TurnId),
    FinishStream(TurnId),
    EnterHandoff(TurnId),
    ExpireHandoff,
    Close,
}

/// Rejection reason for illegal phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRejection {
    StreamBusy { active: TurnId, attempted: TurnId },
    TurnMismatch { active: TurnId, attempted: TurnId },
    NoActiveStream,
    HandoffActive,
    NotInHandoff,
    SessionClosed,
}

/// Result type for phase transition application.
pub type PhaseTransitionResult = Result<SessionPhase, PhaseRejection>;

impl SessionPhase {
    /// Returns the active reply turn if and only if the phase is `Streaming`.
    pub fn active_turn(&self) -> Option<TurnId> {
        match self {
            Self::Streaming(turn) => Some(*turn),
            Self::Idle | Self::HandoffPending | Self::Closed => None,
        }
    }

    /// Returns true when incoming stream data belongs to the active turn.
    ///
    /// Events for any other turn, or arriving in any other phase, must be
    /// dropped by the caller.
    pub fn accepts_turn_event(&self, turn: TurnId) -> bool {
        matches!(self, Self::Streaming(active) if *active == turn)
    }

    /// Returns true while a human handoff is pending.
    pub fn handoff_active(&self) -> bool {
        matches!(self, Self::HandoffPending)
    }

    /// Returns true once the widget session has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Applies one transition deterministically.
    ///
    /// Turn-carrying transitions must match the currently active turn
    /// exactly. `Close` is accepted from every phase and is terminal.
    pub fn apply(&self, transition: PhaseTransition) -> PhaseTransitionResult {
        match transition {
            PhaseTransition::StartStream(turn) => self.apply_start(turn),
            PhaseTransition::FinishStream(turn) => self.apply_finish(turn),
            PhaseTransition::EnterHandoff(turn) => self.apply_enter_handoff(turn),
            PhaseTransition::ExpireHandoff => self.apply_expire_handoff(),
            PhaseTransition::Close => Ok(Self::Closed),
        }
    }

    fn apply_start(&self, turn: TurnId) -> PhaseTransitionResult {
        match self {
            Self::Idle => Ok(Self::Streaming(turn)),
            Self::Streaming(active) if *active == turn => Ok(*self),
            Self::Streaming(active) => Err(PhaseRejection::StreamBusy {
                active: *active,
                attempted: turn,
            }),
            Self::HandoffPending => Err(PhaseRejection::HandoffActive),
            Self::Closed => Err(PhaseRejection::SessionClosed),
        }
    }

    fn apply_finish(&self, turn: TurnId) -> PhaseTransitionResult {
        match self {
            Self::Streaming(active) if *active == turn => Ok(Self::Idle),
            Self::Streaming(active) => Err(PhaseRejection::TurnMismatch {
                active: *active,
                attempted: turn,
            }),
            Self::Closed => Err(PhaseRejection::SessionClosed),
            Self::Idle | Self::HandoffPending => Err(PhaseRejection::NoActiveStream),
        }
    }

    fn apply_enter_handoff(&self, turn: TurnId) -> PhaseTransitionResult {
        match self {
            Self::Streaming(active) if *active == turn => Ok(Self::HandoffPending),
            Self::Streaming(active) => Err(PhaseRejection::TurnMismatch {
                active: *active,
                attempted: turn,
            }),
            Self::Closed => Err(PhaseRejection::SessionClosed),
            Self::Idle | Self::HandoffPending => Err(PhaseRejection::NoActiveStream),
        }
    }

    fn apply_expire_handoff(&self) -> PhaseTransitionResult {
        match self {
            Self::HandoffPending => Ok(Self::Idle),
            Self::Closed => Err(PhaseRejection::SessionClosed),
            Self::Idle | Self::Streaming(_) => Err(PhaseRejection::NotInHandoff),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TURN_ONE: TurnId = TurnId::new(1);
    const TURN_TWO: TurnId = TurnId::new(2);

    #[test]
    fn start_stream_only_from_idle() {
        assert_eq!(
            SessionPhase::Idle.apply(PhaseTransition::StartStream(TURN_ONE)),
            Ok(SessionPhase::Streaming(TURN_ONE))
        );
        assert_eq!(
            SessionPhase::Streaming(TURN_ONE).apply(PhaseTransition::StartStream(TURN_TWO)),
            Err(PhaseRejection::StreamBusy {
                active: TURN_ONE,
                attempted: TURN_TWO,
            })
        );
        assert_eq!(
            SessionPhase::HandoffPending.apply(PhaseTransition::StartStream(TURN_ONE)),
            Err(PhaseRejection::HandoffActive)
        );
        assert_eq!(
            SessionPhase::Closed.apply(PhaseTransition::StartStream(TURN_ONE)),
            Err(PhaseRejection::SessionClosed)
        );
    }

    #[test]
    fn restarting_the_active_turn_is_idempotent() {
        assert_eq!(
            SessionPhase::Streaming(TURN_ONE).apply(PhaseTransition::StartStream(TURN_ONE)),
            Ok(SessionPhase::Streaming(TURN_ONE))
        );
    }

    #[test]
    fn finish_stream_requires_exact_turn_match() {
        assert_eq!(
            SessionPhase::Streaming(TURN_ONE).apply(PhaseTransition::FinishStream(TURN_ONE)),
            Ok(SessionPhase::Idle)
        );
        assert_eq!(
            SessionPhase::Streaming(TURN_ONE).apply(PhaseTransition::FinishStream(TURN_TWO)),
            Err(PhaseRejection::TurnMismatch {
                active: TURN_ONE,
                attempted: TURN_TWO,
            })
        );
        assert_eq!(
            SessionPhase::Idle.apply(PhaseTransition::FinishStream(TURN_ONE)),
            Err(PhaseRejection::NoActiveStream)
        );
    }

    #[test]
    fn handoff_enters_only_from_the_matching_stream() {
        assert_eq!(
            SessionPhase::Streaming(TURN_ONE).apply(PhaseTransition::EnterHandoff(TURN_ONE)),
            Ok(SessionPhase::HandoffPending)
        );
        assert_eq!(
            SessionPhase::Streaming(TURN_ONE).apply(PhaseTransition::EnterHandoff(TURN_TWO)),
            Err(PhaseRejection::TurnMismatch {
                active: TURN_ONE,
                attempted: TURN_TWO,
            })
        );
        assert_eq!(
            SessionPhase::HandoffPending.apply(PhaseTransition::EnterHandoff(TURN_ONE)),
            Err(PhaseRejection::NoActiveStream)
        );
    }

    #[test]
    fn expire_handoff_returns_to_idle_only_from_handoff() {
        assert_eq!(
            SessionPhase::HandoffPending.apply(PhaseTransition::ExpireHandoff),
            Ok(SessionPhase::Idle)
        );
        assert_eq!(
            SessionPhase::Idle.apply(PhaseTransition::ExpireHandoff),
            Err(PhaseRejection::NotInHandoff)
        );
        assert_eq!(
            SessionPhase::Closed.apply(PhaseTransition::ExpireHandoff),
            Err(PhaseRejection::SessionClosed)
        );
    }

    #[test]
    fn close_is_accepted_from_every_phase() {
        for phase in [
            SessionPhase::Idle,
            SessionPhase::Streaming(TURN_ONE),
            SessionPhase::HandoffPending,
            SessionPhase::Closed,
        ] {
            assert_eq!(phase.apply(PhaseTransition::Close), Ok(SessionPhase::Closed));
        }
    }

    #[test]
    fn accepts_turn_event_only_for_the_active_turn() {
        assert!(SessionPhase::Streaming(TURN_ONE).accepts_turn_event(TURN_ONE));
        assert!(!SessionPhase::Streaming(TURN_ONE).accepts_turn_event(TURN_TWO));
        assert!(!SessionPhase::Idle.accepts_turn_event(TURN_ONE));
        assert!(!SessionPhase::HandoffPending.accepts_turn_event(TURN_ONE));
        assert!(!SessionPhase::Closed.accepts_turn_event(TURN_ONE));
    }

    #[test]
    fn handoff_banner_state_is_derived_from_phase() {
        assert!(SessionPhase::HandoffPending.handoff_active());
        assert!(!SessionPhase::Idle.handoff_active());
        assert!(!SessionPhase::Streaming(TURN_ONE).handoff_active());
        assert!(!SessionPhase::Closed.handoff_active());
    }
}
