#![deny(unsafe_code)]

/// Single-shot handoff countdown timer.
pub mod handoff;
/// Staff paging channel.
pub mod notify;
pub mod session;
/// Widget configuration and the disk-backed settings store.
pub mod settings;

pub use handoff::HandoffTimer;
pub use notify::{LogStaffNotifier, StaffNotifier, deposit_support_alert};
pub use session::{
    ASSISTANT_UNAVAILABLE_APOLOGY, ChatSession, HANDOFF_FALLBACK_NOTICE, HANDOFF_TRANSFER_NOTICE,
    ImageAttachment, SubmitError, SubmitOutcome, UserInput, off_hours_notice,
    stream_failure_notice,
};
pub use settings::{
    AssistantSettings, DEFAULT_ENDPOINT, DEFAULT_HANDOFF_TIMEOUT_SECONDS, DEFAULT_MAX_IMAGE_BYTES,
    DEFAULT_MODEL, DEFAULT_PROVIDER_ID, SETTINGS_DIRECTORY_NAME, SETTINGS_FILE_NAME,
    SettingsError, SettingsStore, WidgetSettings,
};
