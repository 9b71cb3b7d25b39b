//! Telegram transport using teloxide.

use std::path::Path;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Telegram refuses longer text messages.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Telegram request failed: {0}")]
    Request(String),
    #[error("Download failed: {0}")]
    Download(String),
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server-side location of an uploaded file.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub path: String,
}

/// What the orchestrator needs from the chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send text, returning the id of the (last) message sent.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, TransportError>;

    /// Send the OGG/Opus file at `audio` as a voice message.
    async fn send_voice(
        &self,
        chat_id: i64,
        audio: &Path,
        caption: Option<&str>,
    ) -> Result<i64, TransportError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError>;

    async fn file_ref(&self, file_id: &str) -> Result<FileRef, TransportError>;

    /// Download `file` into `destination`, creating or truncating it.
    async fn download_file(&self, file: &FileRef, destination: &Path) -> Result<(), TransportError>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, TransportError> {
        let mut last_id = 0;
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            last_id = self
                .bot
                .send_message(ChatId(chat_id), chunk)
                .await
                .map(|msg| msg.id.0 as i64)
                .map_err(|e| {
                    let msg = format!("Failed to send: {e}");
                    warn!("{}", msg);
                    TransportError::Request(msg)
                })?;
        }
        Ok(last_id)
    }

    async fn send_voice(
        &self,
        chat_id: i64,
        audio: &Path,
        caption: Option<&str>,
    ) -> Result<i64, TransportError> {
        info!("🔊 Sending voice to chat {} from {:?}", chat_id, audio);

        let input_file = InputFile::file(audio.to_path_buf()).file_name("voice.ogg");
        let mut request = self.bot.send_voice(ChatId(chat_id), input_file);

        if let Some(cap) = caption {
            request = request.caption(cap);
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send voice: {e}");
            warn!("{}", msg);
            TransportError::Request(msg)
        })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError> {
        debug!("Deleting message {} in chat {}", message_id, chat_id);

        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id as i32))
            .await
            .map_err(|e| {
                let msg = format!("Failed to delete message: {e}");
                warn!("{}", msg);
                TransportError::Request(msg)
            })?;

        Ok(())
    }

    async fn file_ref(&self, file_id: &str) -> Result<FileRef, TransportError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| TransportError::Request(format!("Failed to get file info: {e}")))?;
        Ok(FileRef { path: file.path })
    }

    async fn download_file(&self, file: &FileRef, destination: &Path) -> Result<(), TransportError> {
        let mut dst = tokio::fs::File::create(destination).await?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;
        dst.flush().await?;

        info!("📥 Downloaded {} to {:?}", file.path, destination);
        Ok(())
    }
}

/// Split `text` into pieces of at most `limit` characters, preferring line breaks.
pub fn split_message(text: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        // Byte offset of the first character past the limit.
        let hard = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = match rest[..hard].rfind('\n') {
            Some(i) if i > 0 => i,
            _ => hard,
        };
        chunks.push(&rest[..cut]);
        rest = rest[cut..].trim_start_matches('\n');
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest);
    }
    chunks
}
