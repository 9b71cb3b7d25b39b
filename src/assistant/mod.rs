//! Assistant module - everything that talks to the remote assistant.

pub mod gateway;
pub mod openai;
pub mod tools;
pub mod types;
pub mod validator;

use async_trait::async_trait;

pub use gateway::{ensure_assistant, Gateway, GatewayError, Invocation, MoodLabel, PendingToolCall, PollSettings};
pub use openai::{ApiError, Models, OpenAiClient};
pub use tools::{SaveValueArgs, ToolDefinition};
pub use types::{Role, Run, RunStatus, ThreadMessage, ToolOutput};
pub use validator::ValueValidator;

/// What to create when no assistant id is configured.
#[derive(Debug, Clone)]
pub struct AssistantSpec {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub vector_store_id: Option<String>,
}

/// Request/response primitives of the assistant backend.
///
/// Implementations report failures as [`ApiError`]; the [`Gateway`] is the
/// only caller and turns them into results.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String, ApiError>;

    async fn create_thread(&self) -> Result<String, ApiError>;

    async fn post_message(&self, thread_id: &str, role: Role, content: &str) -> Result<(), ApiError>;

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<Run, ApiError>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError>;

    /// Messages of a thread, most recent first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ApiError>;

    /// Stop a run that is still pending or waiting for tool outputs.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), ApiError>;

    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, ApiError>;

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ApiError>;

    /// Free-text answer to `prompt` about the image at `image_url`.
    async fn describe_image(&self, prompt: &str, image_url: &str) -> Result<String, ApiError>;

    /// Raw JSON verdict for `text` under `rubric`.
    async fn judge(&self, rubric: &str, text: &str) -> Result<String, ApiError>;
}
