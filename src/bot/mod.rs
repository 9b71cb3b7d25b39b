//! Bot module - relays Telegram messages to the assistant and back.

pub mod conversation;
pub mod database;
pub mod orchestrator;
pub mod telegram;


pub use conversation::{ConversationState, ThreadCache};
pub use database::{Database, NewValue, StoreError, ValueRecord, ValueSink};
pub use orchestrator::{Orchestrator, OrchestratorSettings, Turn};
pub use telegram::{FileRef, TelegramClient, Transport, TransportError};
