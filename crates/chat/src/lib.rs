#![deny(unsafe_code)]

/// Relative timestamp formatting for message bubbles.
pub mod display;
/// Assistant stream events mapped into chat domain language.
pub mod events;
/// Staffing window and the once-per-period off-hours gate.
pub mod hours;
/// Domain entities and typed identifiers.
pub mod message;
/// Deterministic session lifecycle state machine.
pub mod phase;
pub mod transcript;

pub use display::time_ago;
pub use events::{AssistantEvent, TurnEvent};
pub use hours::{OffHoursGate, StaffedHours, local_hour};
pub use message::{Message, MessageId, MessageKind, Sender, TurnId, unix_now_seconds};
pub use phase::{PhaseRejection, PhaseTransition, PhaseTransitionResult, SessionPhase};
pub use transcript::Transcript;
