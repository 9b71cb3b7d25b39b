//! Recording fakes for the assistant backend, the transport and the sink.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::assistant::types::{
    FunctionCall, MessageContent, RequiredAction, Role, Run, RunToolCall, SubmitToolOutputs,
    TextContent, ThreadMessage, ToolOutput,
};
use crate::assistant::{ApiError, AssistantBackend, AssistantSpec, ToolDefinition};
use crate::bot::database::{NewValue, StoreError, ValueSink};
use crate::bot::telegram::{FileRef, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct SubmittedOutput {
    pub thread_id: String,
    pub run_id: String,
    pub tool_call_id: String,
    pub output: String,
}

/// Scriptable backend.
///
/// Run statuses come from the scripted queue; once it is empty a run is
/// `requires_action` while a tool call is scripted and unanswered, and
/// `completed` otherwise. Every unscripted single-shot capability fails.
#[derive(Default)]
pub struct MockBackend {
    statuses: Mutex<VecDeque<String>>,
    tool_call: Option<(String, String)>,
    reply: Option<String>,
    verdict: Option<String>,
    transcript: Option<String>,
    speech: Option<Vec<u8>>,
    mood: Option<String>,
    fail_threads: bool,
    threads: AtomicUsize,
    runs: AtomicUsize,
    assistants: AtomicUsize,
    polls: AtomicUsize,
    posted: Mutex<Vec<(String, String)>>,
    runs_with_tools: Mutex<Vec<bool>>,
    submitted: Mutex<Vec<SubmittedOutput>>,
    cancelled: Mutex<Vec<(String, String)>>,
    judged: Mutex<Vec<String>>,
    spoken: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(self, statuses: &[&str]) -> Self {
        *self.statuses.lock().unwrap() = statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_tool_call(mut self, name: &str, arguments: &str) -> Self {
        self.tool_call = Some((name.to_string(), arguments.to_string()));
        self
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = Some(reply.to_string());
        self
    }

    pub fn with_verdict(mut self, verdict: &str) -> Self {
        self.verdict = Some(verdict.to_string());
        self
    }

    pub fn with_transcript(mut self, transcript: &str) -> Self {
        self.transcript = Some(transcript.to_string());
        self
    }

    pub fn with_speech(mut self, audio: &[u8]) -> Self {
        self.speech = Some(audio.to_vec());
        self
    }

    pub fn with_mood(mut self, mood: &str) -> Self {
        self.mood = Some(mood.to_string());
        self
    }

    pub fn failing_threads(mut self) -> Self {
        self.fail_threads = true;
        self
    }

    pub fn threads_created(&self) -> usize {
        self.threads.load(Ordering::SeqCst)
    }

    pub fn assistants_created(&self) -> usize {
        self.assistants.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn posted(&self) -> Vec<(String, String)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn runs_with_tools(&self) -> Vec<bool> {
        self.runs_with_tools.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<SubmittedOutput> {
        self.submitted.lock().unwrap().clone()
    }

    /// `(thread_id, run_id)` of every cancelled run.
    pub fn cancelled(&self) -> Vec<(String, String)> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn judged(&self) -> Vec<String> {
        self.judged.lock().unwrap().clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    fn next_status(&self) -> String {
        if let Some(status) = self.statuses.lock().unwrap().pop_front() {
            return status;
        }
        if self.tool_call.is_some() && self.submitted.lock().unwrap().is_empty() {
            "requires_action".to_string()
        } else {
            "completed".to_string()
        }
    }

    fn run(&self, thread_id: &str, run_id: &str) -> Run {
        let status = self.next_status();
        let required_action = match (&self.tool_call, status.as_str()) {
            (Some((name, arguments)), "requires_action") => Some(RequiredAction {
                submit_tool_outputs: SubmitToolOutputs {
                    tool_calls: vec![RunToolCall {
                        id: "call_1".to_string(),
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    }],
                },
            }),
            _ => None,
        };
        Run {
            id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            status,
            required_action,
            last_error: None,
        }
    }
}

fn text_message(id: usize, role: Role, text: &str) -> ThreadMessage {
    ThreadMessage {
        id: format!("msg_{id}"),
        role,
        content: vec![MessageContent::Text {
            text: TextContent {
                value: text.to_string(),
            },
        }],
    }
}

#[async_trait]
impl AssistantBackend for MockBackend {
    async fn create_assistant(&self, _spec: &AssistantSpec) -> Result<String, ApiError> {
        self.assistants.fetch_add(1, Ordering::SeqCst);
        Ok("asst_new".to_string())
    }

    async fn create_thread(&self) -> Result<String, ApiError> {
        if self.fail_threads {
            return Err(ApiError::Http("connection refused".to_string()));
        }
        let n = self.threads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("thread_{n}"))
    }

    async fn post_message(&self, thread_id: &str, _role: Role, content: &str) -> Result<(), ApiError> {
        self.posted
            .lock()
            .unwrap()
            .push((thread_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        _assistant_id: &str,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<Run, ApiError> {
        self.runs_with_tools.lock().unwrap().push(tools.is_some());
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.run(thread_id, &format!("run_{n}")))
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.run(thread_id, run_id))
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError> {
        let mut messages: Vec<ThreadMessage> = self
            .posted
            .lock()
            .unwrap()
            .iter()
            .filter(|(thread, _)| thread == thread_id)
            .enumerate()
            .map(|(i, (_, text))| text_message(i, Role::User, text))
            .collect();
        if let Some(ref reply) = self.reply {
            messages.push(text_message(messages.len(), Role::Assistant, reply));
        }
        messages.reverse();
        Ok(messages)
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ApiError> {
        {
            let mut submitted = self.submitted.lock().unwrap();
            for output in outputs {
                submitted.push(SubmittedOutput {
                    thread_id: thread_id.to_string(),
                    run_id: run_id.to_string(),
                    tool_call_id: output.tool_call_id.clone(),
                    output: output.output.clone(),
                });
            }
        }
        Ok(self.run(thread_id, run_id))
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), ApiError> {
        self.cancelled
            .lock()
            .unwrap()
            .push((thread_id.to_string(), run_id.to_string()));
        Ok(())
    }

    async fn transcribe(&self, _audio: Vec<u8>, _file_name: &str) -> Result<String, ApiError> {
        self.transcript.clone().ok_or(ApiError::Empty)
    }

    async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>, ApiError> {
        self.spoken.lock().unwrap().push(text.to_string());
        self.speech.clone().ok_or(ApiError::Api {
            status: 500,
            body: "tts unavailable".to_string(),
        })
    }

    async fn describe_image(&self, _prompt: &str, _image_url: &str) -> Result<String, ApiError> {
        self.mood.clone().ok_or(ApiError::Empty)
    }

    async fn judge(&self, _rubric: &str, text: &str) -> Result<String, ApiError> {
        self.judged.lock().unwrap().push(text.to_string());
        self.verdict
            .clone()
            .ok_or(ApiError::Http("judge unreachable".to_string()))
    }
}

/// What the fake transport was asked to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text { chat_id: i64, text: String },
    Voice { chat_id: i64, audio: Vec<u8>, caption: Option<String> },
    Deleted { chat_id: i64, message_id: i64 },
}

#[derive(Default)]
pub struct MockTransport {
    file_bytes: Vec<u8>,
    file_path: String,
    fail_download: bool,
    fail_voice: bool,
    next_id: AtomicI64,
    sent: Mutex<Vec<Sent>>,
    downloads: Mutex<Vec<PathBuf>>,
    voice_files: Mutex<Vec<PathBuf>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            file_bytes: b"OggS-fake-audio".to_vec(),
            file_path: "voice/file_1.oga".to_string(),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, path: &str, bytes: &[u8]) -> Self {
        self.file_path = path.to_string();
        self.file_bytes = bytes.to_vec();
        self
    }

    pub fn failing_downloads(mut self) -> Self {
        self.fail_download = true;
        self
    }

    /// Reject every voice message after reading its file.
    pub fn failing_voice(mut self) -> Self {
        self.fail_voice = true;
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> Vec<PathBuf> {
        self.downloads.lock().unwrap().clone()
    }

    /// Files passed to `send_voice`, including rejected ones.
    pub fn voice_files(&self) -> Vec<PathBuf> {
        self.voice_files.lock().unwrap().clone()
    }

    /// Texts sent to any chat, in order.
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn next_message_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 100
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64, TransportError> {
        self.sent.lock().unwrap().push(Sent::Text {
            chat_id,
            text: text.to_string(),
        });
        Ok(self.next_message_id())
    }

    async fn send_voice(
        &self,
        chat_id: i64,
        audio: &Path,
        caption: Option<&str>,
    ) -> Result<i64, TransportError> {
        self.voice_files.lock().unwrap().push(audio.to_path_buf());
        let audio = std::fs::read(audio)?;
        if self.fail_voice {
            return Err(TransportError::Request("Bad Request: VOICE_MESSAGES_FORBIDDEN".to_string()));
        }
        self.sent.lock().unwrap().push(Sent::Voice {
            chat_id,
            audio,
            caption: caption.map(str::to_string),
        });
        Ok(self.next_message_id())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Deleted { chat_id, message_id });
        Ok(())
    }

    async fn file_ref(&self, _file_id: &str) -> Result<FileRef, TransportError> {
        Ok(FileRef {
            path: self.file_path.clone(),
        })
    }

    async fn download_file(&self, _file: &FileRef, destination: &Path) -> Result<(), TransportError> {
        if self.fail_download {
            return Err(TransportError::Download("network unreachable".to_string()));
        }
        std::fs::write(destination, &self.file_bytes)?;
        self.downloads.lock().unwrap().push(destination.to_path_buf());
        Ok(())
    }
}

/// Sink whose commits always fail.
pub struct FailingSink;

#[async_trait]
impl ValueSink for FailingSink {
    async fn insert(&self, _value: NewValue) -> Result<i64, StoreError> {
        Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
    }
}
