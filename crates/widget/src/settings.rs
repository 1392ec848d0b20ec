use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use souk_assistant::AssistantConfig;
use souk_chat::StaffedHours;

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const SETTINGS_DIRECTORY_NAME: &str = "souk-support";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DEFAULT_HANDOFF_TIMEOUT_SECONDS: u64 = 120;
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// Provider connection settings for the support assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
        }
    }
}

impl AssistantSettings {
    /// Builds the assistant connection config, or `None` without an API key.
    pub fn to_assistant_config(&self) -> Option<AssistantConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        Some(AssistantConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
            &self.model,
        ))
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_string()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        self.model = if self.model.trim().is_empty() {
            default_model()
        } else {
            self.model.trim().to_string()
        };

        self
    }
}

/// Deploy-time configuration for one support widget installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSettings {
    #[serde(default)]
    pub staffed_hours: StaffedHours,
    /// Fixed UTC offset of the storefront, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_handoff_timeout_seconds")]
    pub handoff_timeout_seconds: u64,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
    #[serde(default)]
    pub assistant: AssistantSettings,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            staffed_hours: StaffedHours::default(),
            utc_offset_minutes: 0,
            handoff_timeout_seconds: default_handoff_timeout_seconds(),
            max_image_bytes: default_max_image_bytes(),
            assistant: AssistantSettings::default(),
        }
    }
}

impl WidgetSettings {
    pub fn normalized(mut self) -> Self {
        self.staffed_hours.opens_at_hour %= 24;
        self.staffed_hours.closes_at_hour %= 24;
        self.utc_offset_minutes = self.utc_offset_minutes.clamp(-14 * 60, 14 * 60);
        if self.handoff_timeout_seconds == 0 {
            self.handoff_timeout_seconds = DEFAULT_HANDOFF_TIMEOUT_SECONDS;
        }
        if self.max_image_bytes == 0 {
            self.max_image_bytes = DEFAULT_MAX_IMAGE_BYTES;
        }
        self.assistant = self.assistant.normalized();

        self
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_secs(self.handoff_timeout_seconds)
    }
}

/// Disk-backed settings with lock-free reads.
///
/// Writes go through an atomic temp-file rename so a crash mid-save never
/// leaves a torn settings file behind.
pub struct SettingsStore {
    settings: Arc<ArcSwap<WidgetSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".souk-support"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<WidgetSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: WidgetSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> WidgetSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return WidgetSettings::default();
        }

        let figment = Figment::from(Serialized::defaults(WidgetSettings::default()))
            .merge(Json::file(path));

        match figment.extract::<WidgetSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                WidgetSettings::default()
            }
        }
    }

    fn persist(&self, settings: &WidgetSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_handoff_timeout_seconds() -> u64 {
    DEFAULT_HANDOFF_TIMEOUT_SECONDS
}

fn default_max_image_bytes() -> u64 {
    DEFAULT_MAX_IMAGE_BYTES
}
