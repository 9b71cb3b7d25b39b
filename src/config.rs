use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assistant::{Models, PollSettings};

/// Errors that can occur when loading or updating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
    /// Failed to write the config file back.
    Write { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
            Self::Write { path, source } => {
                write!(f, "failed to write config file '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Write { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

/// How plain text messages are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMode {
    /// Value identification with the `save_value` tool attached.
    #[default]
    Values,
    /// Plain conversation on the user's cached thread.
    Chat,
}

/// Whether value turns get a fresh thread or the user's cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPolicy {
    #[default]
    OneShot,
    Persistent,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    openai_api_key: String,
    assistant_id: Option<String>,
    /// Knowledge store for `file_search`.
    vector_store_id: Option<String>,
    #[serde(default = "default_assistant_model")]
    assistant_model: String,
    #[serde(default = "default_assistant_instructions")]
    assistant_instructions: String,
    judge_model: Option<String>,
    vision_model: Option<String>,
    transcription_model: Option<String>,
    speech_model: Option<String>,
    #[serde(default = "default_voice")]
    voice: String,
    #[serde(default)]
    text_mode: TextMode,
    #[serde(default)]
    thread_policy: ThreadPolicy,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    max_poll_attempts: u32,
    #[serde(default = "default_max_poll_wait_secs")]
    max_poll_wait_secs: u64,
    /// Directory for state files (logs, database). Defaults to current directory.
    data_dir: Option<String>,
    database_path: Option<String>,
    temp_dir: Option<String>,
    amplitude_api_key: Option<String>,
    #[serde(default = "default_analytics_queue_capacity")]
    analytics_queue_capacity: usize,
}

fn default_assistant_model() -> String {
    "gpt-4o".to_string()
}

fn default_assistant_instructions() -> String {
    "You are a helpful assistant".to_string()
}

fn default_voice() -> String {
    "nova".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_attempts() -> u32 {
    120
}

fn default_max_poll_wait_secs() -> u64 {
    180
}

fn default_analytics_queue_capacity() -> usize {
    256
}

pub struct Config {
    /// Path to the config file (for writing back a provisioned assistant id)
    pub config_path: PathBuf,
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub assistant_id: Option<String>,
    pub vector_store_id: Option<String>,
    pub assistant_model: String,
    pub assistant_instructions: String,
    pub models: Models,
    pub voice: String,
    pub text_mode: TextMode,
    pub thread_policy: ThreadPolicy,
    pub poll: PollSettings,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub temp_dir: PathBuf,
    pub amplitude_api_key: Option<String>,
    pub analytics_queue_capacity: usize,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load the file, then apply overrides from `lookup` (normally the process environment).
    ///
    /// A missing file is treated as an empty one so a deployment can run on
    /// environment variables alone.
    pub fn load_with_env<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let mut file: ConfigFile = match std::fs::read_to_string(&config_path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                serde_json::from_str("{}").map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?
            }
            Err(e) => return Err(ConfigError::ReadFile { path: config_path, source: e }),
        };

        let env = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(token) = env("BOT_TOKEN") {
            file.telegram_bot_token = token;
        }
        if let Some(key) = env("OPENAI_API_KEY") {
            file.openai_api_key = key;
        }
        if let Some(id) = env("ASSISTANT_ID") {
            file.assistant_id = Some(id);
        }
        if let Some(id) = env("VECTOR_STORE_ID") {
            file.vector_store_id = Some(id);
        }
        if let Some(key) = env("AMPLITUDE_API_KEY") {
            file.amplitude_api_key = Some(key);
        }
        if let Some(path) = env("DATABASE_PATH") {
            file.database_path = Some(path);
        }

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.openai_api_key.trim().is_empty() {
            return Err(ConfigError::Validation("openai_api_key is required".into()));
        }
        if file.poll_interval_ms == 0 || file.max_poll_attempts == 0 || file.max_poll_wait_secs == 0 {
            return Err(ConfigError::Validation("poll settings must be positive".into()));
        }
        if file.analytics_queue_capacity == 0 {
            return Err(ConfigError::Validation("analytics_queue_capacity must be at least 1".into()));
        }

        let defaults = Models::default();
        let models = Models {
            judge: file.judge_model.unwrap_or(defaults.judge),
            vision: file.vision_model.unwrap_or(defaults.vision),
            transcription: file.transcription_model.unwrap_or(defaults.transcription),
            speech: file.speech_model.unwrap_or(defaults.speech),
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let database_path = file
            .database_path
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("valuebot.db"));
        let temp_dir = file
            .temp_dir
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            config_path,
            telegram_bot_token: file.telegram_bot_token,
            openai_api_key: file.openai_api_key,
            assistant_id: file.assistant_id.filter(|id| !id.trim().is_empty()),
            vector_store_id: file.vector_store_id.filter(|id| !id.trim().is_empty()),
            assistant_model: file.assistant_model,
            assistant_instructions: file.assistant_instructions,
            models,
            voice: file.voice,
            text_mode: file.text_mode,
            thread_policy: file.thread_policy,
            poll: PollSettings {
                interval: Duration::from_millis(file.poll_interval_ms),
                max_attempts: file.max_poll_attempts,
                max_wait: Duration::from_secs(file.max_poll_wait_secs),
            },
            data_dir,
            database_path,
            temp_dir,
            amplitude_api_key: file.amplitude_api_key.filter(|k| !k.trim().is_empty()),
            analytics_queue_capacity: file.analytics_queue_capacity,
        })
    }

    /// Write `assistant_id` into the config file, keeping every other key.
    pub fn persist_assistant_id(&mut self, id: &str) -> Result<(), ConfigError> {
        let mut root = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => serde_json::from_str::<serde_json::Value>(&content)
                .map_err(|e| ConfigError::ParseJson { path: self.config_path.clone(), source: e })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::json!({}),
            Err(e) => return Err(ConfigError::ReadFile { path: self.config_path.clone(), source: e }),
        };
        let Some(object) = root.as_object_mut() else {
            return Err(ConfigError::Validation("config file must contain a JSON object".into()));
        };
        object.insert("assistant_id".to_string(), serde_json::Value::String(id.to_string()));

        let content = serde_json::to_string_pretty(&root)
            .map_err(|e| ConfigError::ParseJson { path: self.config_path.clone(), source: e })?;
        std::fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::Write { path: self.config_path.clone(), source: e })?;

        self.assistant_id = Some(id.to_string());
        Ok(())
    }
}
