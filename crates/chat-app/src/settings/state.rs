use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use gemchat_llm::{
    DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL, DEFAULT_PROBE_TIMEOUT, OLLAMA_PROVIDER_ID,
    ProviderConfig,
};
use serde::{Deserialize, Serialize};

use crate::chat::TurnConfig;
use crate::chat::turn::{
    DEFAULT_CHUNK_LOG_INTERVAL, DEFAULT_MAX_LOG_LENGTH, DEFAULT_STREAM_TIMEOUT,
    DEFAULT_TURN_TIMEOUT,
};

pub const SETTINGS_DIRECTORY_NAME: &str = "gemchat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const CONFIG_PATH_ENV: &str = "GEMCHAT_CONFIG";
pub const ENV_PREFIX: &str = "GEMCHAT_";

pub const DEFAULT_TITLE: &str = "Gemma Chatbot";
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";
pub const DEFAULT_LOG_FILE: &str = "app.log";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = DEFAULT_PROBE_TIMEOUT.as_secs();
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = DEFAULT_STREAM_TIMEOUT.as_secs();
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = DEFAULT_TURN_TIMEOUT.as_secs();

/// Process-wide settings, fixed once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub title: String,
    pub model: String,
    pub base_url: String,
    pub system_message: String,
    pub probe_timeout_secs: u64,
    pub stream_timeout_secs: u64,
    pub turn_timeout_secs: u64,
    /// Empty disables the log file and sends logs to stderr.
    pub log_file: String,
    pub log_level: String,
    /// Also copy log lines to stderr while a log file is written.
    pub log_to_stderr: bool,
    pub chunk_log_interval: usize,
    pub max_log_length: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            stream_timeout_secs: DEFAULT_STREAM_TIMEOUT_SECS,
            turn_timeout_secs: DEFAULT_TURN_TIMEOUT_SECS,
            log_file: DEFAULT_LOG_FILE.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_to_stderr: false,
            chunk_log_interval: DEFAULT_CHUNK_LOG_INTERVAL,
            max_log_length: DEFAULT_MAX_LOG_LENGTH,
        }
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.title = non_blank_or(self.title, DEFAULT_TITLE);
        self.model = non_blank_or(self.model, DEFAULT_OLLAMA_MODEL);
        self.base_url = non_blank_or(self.base_url, DEFAULT_OLLAMA_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        self.system_message = non_blank_or(self.system_message, DEFAULT_SYSTEM_MESSAGE);
        self.log_level = non_blank_or(self.log_level, DEFAULT_LOG_LEVEL);
        // Blank is meaningful here, see `log_file`.
        self.log_file = self.log_file.trim().to_string();

        self.probe_timeout_secs = positive_or(self.probe_timeout_secs, DEFAULT_PROBE_TIMEOUT_SECS);
        self.stream_timeout_secs =
            positive_or(self.stream_timeout_secs, DEFAULT_STREAM_TIMEOUT_SECS);
        self.turn_timeout_secs = positive_or(self.turn_timeout_secs, DEFAULT_TURN_TIMEOUT_SECS);
        self.chunk_log_interval = positive_or(self.chunk_log_interval, DEFAULT_CHUNK_LOG_INTERVAL);
        self.max_log_length = positive_or(self.max_log_length, DEFAULT_MAX_LOG_LENGTH);

        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    pub fn log_file_path(&self) -> Option<PathBuf> {
        (!self.log_file.is_empty()).then(|| PathBuf::from(&self.log_file))
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(
            OLLAMA_PROVIDER_ID,
            &self.base_url,
            Some(self.model.clone()),
        )
    }

    pub fn to_turn_config(&self) -> TurnConfig {
        TurnConfig::new(&self.model)
            .with_stream_timeout(self.stream_timeout())
            .with_turn_timeout(self.turn_timeout())
            .with_log_limits(self.chunk_log_interval, self.max_log_length)
    }
}

/// Where the effective settings came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsOrigin {
    Defaults,
    File(PathBuf),
}

/// Result of [`SettingsStore::load`]. Logging is not set up yet when settings
/// load, so problems are carried out for the caller to report.
#[derive(Debug, Clone)]
pub struct SettingsLoad {
    pub settings: Settings,
    pub origin: SettingsOrigin,
    pub warning: Option<String>,
}

pub struct SettingsStore;

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".gemchat"))
    }

    /// `GEMCHAT_CONFIG` wins over the per-user config directory.
    pub fn default_config_path() -> PathBuf {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::default_config_dir().join(SETTINGS_FILE_NAME),
        }
    }

    pub fn load() -> SettingsLoad {
        Self::load_from(&Self::default_config_path())
    }

    /// Defaults, then the JSON file when present, then `GEMCHAT_*` variables.
    pub fn load_from(path: &Path) -> SettingsLoad {
        let origin = if path.exists() {
            SettingsOrigin::File(path.to_path_buf())
        } else {
            SettingsOrigin::Defaults
        };

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]));

        match figment.extract::<Settings>() {
            Ok(settings) => SettingsLoad {
                settings: settings.normalized(),
                origin,
                warning: None,
            },
            Err(error) => SettingsLoad {
                settings: Settings::default(),
                origin: SettingsOrigin::Defaults,
                warning: Some(format!(
                    "failed to parse settings from {path:?}: {error}. using defaults"
                )),
            },
        }
    }
}

fn non_blank_or(value: String, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

fn positive_or<T: Default + PartialEq>(value: T, default: T) -> T {
    if value == T::default() { default } else { value }
}
