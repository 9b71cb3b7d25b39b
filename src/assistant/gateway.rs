//! Assistant gateway - hides thread/run mechanics behind typed results.
//!
//! A turn goes NEW -> THREAD_CREATED -> MESSAGE_SENT -> RUN_POLLING and ends
//! in one of three [`Invocation`] variants. Backend failures at any step end
//! up in [`Invocation::Failed`]; nothing here returns an error to the caller.
//!
//! All per-turn state (thread id, run id, tool call id) travels inside the
//! returned values. The gateway itself is shared between concurrent turns and
//! holds only configuration.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::assistant::tools::{SAVE_VALUE, SaveValueArgs, ToolDefinition};
use crate::assistant::types::{Role, Run, RunStatus, ToolOutput};
use crate::assistant::{ApiError, AssistantBackend, AssistantSpec};

/// Polling limits for a run.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 120,
            max_wait: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Backend(#[from] ApiError),
    #[error("run still pending after {attempts} polls ({waited_secs}s)")]
    Timeout { attempts: u32, waited_secs: u64 },
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("malformed tool arguments: {0}")]
    MalformedArguments(String),
    #[error("run requires action but has no tool call")]
    MissingToolCall,
    #[error("run ended with status {status}{}", reason_suffix(.reason))]
    RunEnded {
        status: RunStatus,
        reason: Option<String>,
    },
    #[error("assistant returned no text reply")]
    EmptyReply,
}

impl GatewayError {
    /// Whether the run may still be open on the backend, blocking its thread.
    pub fn leaves_run_active(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout { .. }
                | GatewayError::UnknownFunction(_)
                | GatewayError::MalformedArguments(_)
                | GatewayError::MissingToolCall
        )
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

/// A `save_value` request that is waiting for its outcome.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub thread_id: String,
    pub run_id: String,
    pub tool_call_id: String,
    pub value: SaveValueArgs,
}

/// What one assistant invocation produced.
#[derive(Debug)]
pub enum Invocation {
    /// Plain natural-language reply.
    Answer(String),
    /// The assistant wants a value saved. Needs [`Gateway::submit_tool_outcome`].
    SaveValue(PendingToolCall),
    Failed(GatewayError),
}

/// Closed vocabulary for photo mood labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoodLabel {
    Happy,
    Sad,
    Calm,
    Anxious,
    Angry,
    Excited,
    Tired,
    Neutral,
    Unknown,
}

impl MoodLabel {
    const KNOWN: [MoodLabel; 8] = [
        MoodLabel::Happy,
        MoodLabel::Sad,
        MoodLabel::Calm,
        MoodLabel::Anxious,
        MoodLabel::Angry,
        MoodLabel::Excited,
        MoodLabel::Tired,
        MoodLabel::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoodLabel::Happy => "happy",
            MoodLabel::Sad => "sad",
            MoodLabel::Calm => "calm",
            MoodLabel::Anxious => "anxious",
            MoodLabel::Angry => "angry",
            MoodLabel::Excited => "excited",
            MoodLabel::Tired => "tired",
            MoodLabel::Neutral => "neutral",
            MoodLabel::Unknown => "unknown",
        }
    }

    /// Map a model answer onto the vocabulary. Anything else is `Unknown`.
    pub fn parse(answer: &str) -> Self {
        let word = answer
            .trim()
            .trim_matches(|c: char| !c.is_alphabetic())
            .to_lowercase();
        Self::KNOWN
            .into_iter()
            .find(|label| label.as_str() == word)
            .unwrap_or(MoodLabel::Unknown)
    }

    fn prompt() -> String {
        let words: Vec<&str> = Self::KNOWN.iter().map(|l| l.as_str()).collect();
        format!(
            "Describe the mood of this image with exactly one word from this list: {}. \
             Answer with the word only.",
            words.join(", ")
        )
    }
}

impl fmt::Display for MoodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single point of contact with the assistant backend.
pub struct Gateway {
    backend: Arc<dyn AssistantBackend>,
    assistant_id: String,
    tools: Vec<ToolDefinition>,
    poll: PollSettings,
    voice: String,
}

impl Gateway {
    pub fn new(
        backend: Arc<dyn AssistantBackend>,
        assistant_id: String,
        tools: Vec<ToolDefinition>,
        poll: PollSettings,
        voice: String,
    ) -> Self {
        Self {
            backend,
            assistant_id,
            tools,
            poll,
            voice,
        }
    }

    /// Create a new, empty thread.
    pub async fn create_thread(&self) -> Result<String, GatewayError> {
        self.backend.create_thread().await.map_err(|e| {
            error!("Failed to create thread: {e}");
            GatewayError::from(e)
        })
    }

    /// Run the assistant with the value tools attached.
    ///
    /// Without a `thread_id` a fresh thread is created for this turn.
    pub async fn identify_value(&self, thread_id: Option<&str>, text: &str) -> Invocation {
        let result = self.invoke(thread_id, text, Some(self.tools.as_slice())).await;
        settle_invocation(result)
    }

    /// Run the assistant on an existing thread with its own tool set.
    pub async fn converse(&self, thread_id: &str, text: &str) -> Invocation {
        let result = self.invoke(Some(thread_id), text, None).await;
        settle_invocation(result)
    }

    async fn invoke(
        &self,
        thread_id: Option<&str>,
        text: &str,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<Invocation, GatewayError> {
        let thread_id = match thread_id {
            Some(id) => id.to_string(),
            None => self.backend.create_thread().await?,
        };

        self.backend.post_message(&thread_id, Role::User, text).await?;

        let run = self
            .backend
            .create_run(&thread_id, &self.assistant_id, tools)
            .await?;
        debug!("Started run {} on thread {}", run.id, thread_id);

        let run_id = run.id.clone();
        let result = self.finish_run(&thread_id, run).await;
        if let Err(ref e) = result {
            if e.leaves_run_active() {
                self.cancel_run(&thread_id, &run_id).await;
            }
        }
        result
    }

    async fn finish_run(&self, thread_id: &str, run: Run) -> Result<Invocation, GatewayError> {
        let run = self.poll_until_settled(thread_id, run).await?;

        match RunStatus::parse(&run.status) {
            RunStatus::Completed => self.latest_reply(thread_id).await.map(Invocation::Answer),
            RunStatus::RequiresAction => pending_tool_call(thread_id, run).map(Invocation::SaveValue),
            status => Err(GatewayError::RunEnded {
                status,
                reason: run.last_error.map(|e| e.message),
            }),
        }
    }

    /// Poll until the run leaves the pending statuses, within the configured limits.
    async fn poll_until_settled(&self, thread_id: &str, mut run: Run) -> Result<Run, GatewayError> {
        let started = Instant::now();
        let mut attempts = 0u32;

        while RunStatus::parse(&run.status).is_pending() {
            if attempts >= self.poll.max_attempts || started.elapsed() >= self.poll.max_wait {
                warn!("Run {} still {} after {} polls, giving up", run.id, run.status, attempts);
                return Err(GatewayError::Timeout {
                    attempts,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(self.poll.interval).await;
            attempts += 1;
            run = self.backend.get_run(thread_id, &run.id).await?;
        }

        debug!("Run {} settled as {} after {} polls", run.id, run.status, attempts);
        Ok(run)
    }

    async fn latest_reply(&self, thread_id: &str) -> Result<String, GatewayError> {
        let messages = self.backend.list_messages(thread_id).await?;
        messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .find_map(|m| m.text())
            .map(str::to_string)
            .ok_or(GatewayError::EmptyReply)
    }

    /// Tell the backend whether the side effect of `call` succeeded.
    ///
    /// Sends `{"success": <bool>}` as the tool output, then waits for the
    /// continued run to settle so the thread is free for the next turn.
    /// Returns whether the backend accepted the outcome.
    pub async fn submit_tool_outcome(&self, call: &PendingToolCall, success: bool) -> bool {
        let outputs = [ToolOutput {
            tool_call_id: call.tool_call_id.clone(),
            output: serde_json::json!({ "success": success }).to_string(),
        }];

        let run = match self
            .backend
            .submit_tool_outputs(&call.thread_id, &call.run_id, &outputs)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                warn!("Failed to submit tool outcome for {}: {e}", call.tool_call_id);
                return false;
            }
        };
        info!("Reported {} outcome success={}", call.tool_call_id, success);

        match self.poll_until_settled(&call.thread_id, run).await {
            Ok(run) if RunStatus::parse(&run.status) == RunStatus::RequiresAction => {
                warn!("Run {} asked for another tool call, cancelling", run.id);
                self.cancel_run(&call.thread_id, &run.id).await;
            }
            Ok(run) => debug!("Run {} continued to {}", run.id, run.status),
            Err(e) => {
                warn!("Run {} did not settle after outcome: {e}", call.run_id);
                if e.leaves_run_active() {
                    self.cancel_run(&call.thread_id, &call.run_id).await;
                }
            }
        }
        true
    }

    /// Best effort; a failed cancel is only logged.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) {
        match self.backend.cancel_run(thread_id, run_id).await {
            Ok(()) => info!("Cancelled run {} on thread {}", run_id, thread_id),
            Err(e) => warn!("Failed to cancel run {}: {e}", run_id),
        }
    }

    /// Transcribe a voice note. `None` when transcription fails or is empty.
    pub async fn speech_to_text(&self, audio: Vec<u8>) -> Option<String> {
        match self.backend.transcribe(audio, "voice.ogg").await {
            Ok(text) if !text.trim().is_empty() => {
                let preview: String = text.chars().take(50).collect();
                info!("Transcribed: \"{}\"", preview);
                Some(text.trim().to_string())
            }
            Ok(_) => {
                warn!("Transcription came back empty");
                None
            }
            Err(e) => {
                warn!("Transcription failed: {e}");
                None
            }
        }
    }

    /// Synthesize speech for `text`. `None` when synthesis fails.
    pub async fn text_to_speech(&self, text: &str) -> Option<Vec<u8>> {
        match self.backend.synthesize(text, &self.voice).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!("Speech synthesis failed: {e}");
                None
            }
        }
    }

    /// Classify the mood of an image into the closed vocabulary.
    pub async fn describe_image(&self, image_url: &str) -> MoodLabel {
        match self.backend.describe_image(&MoodLabel::prompt(), image_url).await {
            Ok(answer) => {
                let label = MoodLabel::parse(&answer);
                if label == MoodLabel::Unknown {
                    warn!("Vision answer outside vocabulary: {:?}", answer);
                }
                label
            }
            Err(e) => {
                warn!("Image description failed: {e}");
                MoodLabel::Unknown
            }
        }
    }
}

fn settle_invocation(result: Result<Invocation, GatewayError>) -> Invocation {
    match result {
        Ok(invocation) => invocation,
        Err(e) => {
            error!("Assistant error: {e}");
            Invocation::Failed(e)
        }
    }
}

/// Pull the first tool call out of a `requires_action` run.
fn pending_tool_call(thread_id: &str, run: Run) -> Result<PendingToolCall, GatewayError> {
    let call = run
        .required_action
        .and_then(|action| action.submit_tool_outputs.tool_calls.into_iter().next())
        .ok_or(GatewayError::MissingToolCall)?;

    if call.function.name != SAVE_VALUE {
        return Err(GatewayError::UnknownFunction(call.function.name));
    }

    let value: SaveValueArgs = serde_json::from_str(&call.function.arguments)
        .map_err(|e| GatewayError::MalformedArguments(e.to_string()))?;

    Ok(PendingToolCall {
        thread_id: thread_id.to_string(),
        run_id: run.id,
        tool_call_id: call.id,
        value,
    })
}

/// Return the configured assistant id, creating an assistant when there is none.
///
/// Ids shorter than 3 characters count as missing. The second element is
/// `true` when a new assistant was created and the id should be persisted.
pub async fn ensure_assistant(
    backend: &dyn AssistantBackend,
    configured: Option<&str>,
    spec: &AssistantSpec,
) -> Result<(String, bool), ApiError> {
    if let Some(id) = configured.map(str::trim).filter(|id| id.len() >= 3) {
        return Ok((id.to_string(), false));
    }
    info!("No assistant id configured, creating \"{}\"", spec.name);
    let id = backend.create_assistant(spec).await?;
    Ok((id, true))
}
