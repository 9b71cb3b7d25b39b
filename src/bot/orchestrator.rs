//! Per-message workflow: modality conversion, assistant invocation,
//! validation, persistence and the reply.
//!
//! Every `handle_*` entry point recovers locally. The user always gets a
//! reply (possibly an error message) and transient files are always
//! removed, whichever step fails.

use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{error, info, warn};

use crate::analytics::Analytics;
use crate::assistant::{Gateway, GatewayError, Invocation, MoodLabel, PendingToolCall, ValueValidator};
use crate::bot::conversation::ThreadCache;
use crate::bot::database::{NewValue, ValueSink};
use crate::bot::telegram::{Transport, TransportError};
use crate::config::{TextMode, ThreadPolicy};
use crate::tempfiles::TransientFiles;

pub const GREETING: &str = "👋 Send me a voice message to talk with the AI.";
pub const ASK_VALUE: &str = "Please describe your key value (a short phrase or a single word).";
pub const PROCESSING: &str = "Your request is being processed…";
pub const VALUE_SAVED: &str = "✅ Value saved!";
pub const VALUE_REJECTED: &str = "🚫 Invalid description. Please try again.";
pub const SAVE_FAILED: &str = "⚠️ Could not save your value right now. Please try again later.";

/// Telegram caption limit for voice messages.
pub const MAX_CAPTION_CHARS: usize = 1000;

/// Who a turn belongs to and where the reply goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Turn {
    pub chat_id: i64,
    pub user_id: i64,
}

#[derive(Debug, thiserror::Error)]
enum TurnError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not transcribe the voice message")]
    Transcription,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub text_mode: TextMode,
    pub thread_policy: ThreadPolicy,
    pub temp_dir: PathBuf,
}

pub struct Orchestrator {
    gateway: Gateway,
    validator: ValueValidator,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ValueSink>,
    threads: ThreadCache,
    analytics: Analytics,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        gateway: Gateway,
        validator: ValueValidator,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ValueSink>,
        threads: ThreadCache,
        analytics: Analytics,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            gateway,
            validator,
            transport,
            sink,
            threads,
            analytics,
            settings,
        }
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    /// Reply to a text message.
    pub async fn handle_text(&self, turn: Turn, text: &str) {
        let preview: String = text.chars().take(50).collect();
        info!("💬 Text from {}: \"{}\"", turn.user_id, preview);
        self.analytics.track(
            turn.user_id,
            "text_message",
            serde_json::json!({"length": text.chars().count()}),
        );

        let reply = self.respond(turn, text).await;
        self.reply_text(turn, &reply).await;
    }

    /// Transcribe a voice message, respond, and answer with speech.
    pub async fn handle_voice(&self, turn: Turn, file_id: &str) {
        info!("🎤 Voice from {}", turn.user_id);
        self.analytics.track(turn.user_id, "voice_message", serde_json::json!({}));

        let status = match self.transport.send_text(turn.chat_id, PROCESSING).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to send status message: {e}");
                None
            }
        };

        let mut files = TransientFiles::new(&self.settings.temp_dir);
        if let Err(e) = self.voice_turn(turn, file_id, &mut files).await {
            warn!("Voice turn for {} failed: {e}", turn.user_id);
            self.reply_text(turn, &format!("🚨 Error: {e}")).await;
        }

        if let Some(message_id) = status {
            let _ = self.transport.delete_message(turn.chat_id, message_id).await;
        }
        drop(files);
    }

    /// Label the mood of a photo.
    pub async fn handle_photo(&self, turn: Turn, file_id: &str) {
        info!("🖼 Photo from {}", turn.user_id);

        let mut files = TransientFiles::new(&self.settings.temp_dir);
        match self.photo_turn(file_id, &mut files).await {
            Ok(mood) => {
                self.analytics.track(
                    turn.user_id,
                    "photo_message",
                    serde_json::json!({"mood": mood.as_str()}),
                );
                self.reply_text(turn, &format!("Mood: {mood}")).await;
            }
            Err(e) => {
                warn!("Photo turn for {} failed: {e}", turn.user_id);
                self.reply_text(turn, &format!("🚨 Error: {e}")).await;
            }
        }
        drop(files);
    }

    async fn voice_turn(&self, turn: Turn, file_id: &str, files: &mut TransientFiles) -> Result<(), TurnError> {
        let audio_path = files.allocate("voice", "ogg");
        let file = self.transport.file_ref(file_id).await?;
        self.transport.download_file(&file, &audio_path).await?;

        let audio = tokio::fs::read(&audio_path).await?;
        let transcript = self
            .gateway
            .speech_to_text(audio)
            .await
            .ok_or(TurnError::Transcription)?;

        let reply = self.respond(turn, &transcript).await;

        let Some(speech) = self.gateway.text_to_speech(&reply).await else {
            self.reply_text(turn, &reply).await;
            return Ok(());
        };
        let speech_path = files.allocate("speech", "ogg");
        tokio::fs::write(&speech_path, &speech).await?;

        let caption = truncate_chars(&reply, MAX_CAPTION_CHARS);
        if let Err(e) = self
            .transport
            .send_voice(turn.chat_id, &speech_path, Some(&caption))
            .await
        {
            warn!("Voice reply to {} failed, sending text: {e}", turn.chat_id);
            self.reply_text(turn, &reply).await;
        }
        Ok(())
    }

    async fn photo_turn(&self, file_id: &str, files: &mut TransientFiles) -> Result<MoodLabel, TurnError> {
        let photo_path = files.allocate("photo", "jpg");
        let file = self.transport.file_ref(file_id).await?;
        self.transport.download_file(&file, &photo_path).await?;

        let bytes = tokio::fs::read(&photo_path).await?;
        let url = format!("data:{};base64,{}", media_type(&file.path), STANDARD.encode(&bytes));
        Ok(self.gateway.describe_image(&url).await)
    }

    /// The reply text for one user utterance, whatever the modality.
    async fn respond(&self, turn: Turn, text: &str) -> String {
        let (invocation, cached) = match self.settings.text_mode {
            TextMode::Values => {
                let thread_id = match self.settings.thread_policy {
                    ThreadPolicy::OneShot => None,
                    ThreadPolicy::Persistent => match self.cached_thread(turn).await {
                        Ok(id) => Some(id),
                        Err(e) => return error_reply(&e),
                    },
                };
                let invocation = self.gateway.identify_value(thread_id.as_deref(), text).await;
                (invocation, thread_id.is_some())
            }
            TextMode::Chat => match self.cached_thread(turn).await {
                Ok(id) => (self.gateway.converse(&id, text).await, true),
                Err(e) => return error_reply(&e),
            },
        };

        match invocation {
            Invocation::Answer(answer) => answer,
            Invocation::SaveValue(call) => self.save_value(turn, call).await,
            Invocation::Failed(e) => {
                // A run left open would reject the next message on this thread.
                if cached && e.leaves_run_active() {
                    self.threads.forget(turn.user_id).await;
                }
                error_reply(&e)
            }
        }
    }

    async fn cached_thread(&self, turn: Turn) -> Result<String, GatewayError> {
        self.threads
            .get_or_create(turn.user_id, || self.gateway.create_thread())
            .await
    }

    /// Validate, commit, then report the outcome. The outcome is reported on every path.
    async fn save_value(&self, turn: Turn, call: PendingToolCall) -> String {
        let accepted = match call.value.checked_name() {
            Some(_) => self.validator.validate(&call.value.description).await,
            None => {
                warn!("Rejecting value name {:?}", call.value.name);
                false
            }
        };

        if !accepted {
            self.gateway.submit_tool_outcome(&call, false).await;
            self.analytics.track(
                turn.user_id,
                "value_rejected",
                serde_json::json!({"name": call.value.name}),
            );
            return VALUE_REJECTED.to_string();
        }

        let value = NewValue {
            user_id: turn.user_id,
            name: call.value.name.trim().to_string(),
            description: call.value.description.trim().to_string(),
        };
        match self.sink.insert(value).await {
            Ok(id) => {
                info!("💾 Saved value #{} \"{}\" for {}", id, call.value.name.trim(), turn.user_id);
                self.gateway.submit_tool_outcome(&call, true).await;
                self.analytics.track(
                    turn.user_id,
                    "value_saved",
                    serde_json::json!({"name": call.value.name.trim()}),
                );
                VALUE_SAVED.to_string()
            }
            Err(e) => {
                error!("Failed to save value for {}: {e}", turn.user_id);
                self.gateway.submit_tool_outcome(&call, false).await;
                self.analytics.track(turn.user_id, "value_save_failed", serde_json::json!({}));
                SAVE_FAILED.to_string()
            }
        }
    }

    async fn reply_text(&self, turn: Turn, text: &str) {
        if let Err(e) = self.transport.send_text(turn.chat_id, text).await {
            warn!("Failed to reply in chat {}: {e}", turn.chat_id);
        }
    }
}

fn error_reply(e: &GatewayError) -> String {
    format!("Error: {e}")
}

/// First `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn media_type(file_path: &str) -> &'static str {
    let lower = file_path.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg" // Default for Telegram images
    }
}
