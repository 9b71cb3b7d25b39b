//! OpenAI client for threads, runs, audio, vision and chat completions.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::assistant::types::{Role, Run, ThreadMessage, ToolOutput};
use crate::assistant::{AssistantBackend, AssistantSpec, ToolDefinition};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Empty response")]
    Empty,
}

/// Models used for the single-shot capabilities.
#[derive(Debug, Clone)]
pub struct Models {
    pub judge: String,
    pub vision: String,
    pub transcription: String,
    pub speech: String,
}

impl Default for Models {
    fn default() -> Self {
        Self {
            judge: "gpt-4o-mini".to_string(),
            vision: "gpt-4o-mini".to_string(),
            transcription: "whisper-1".to_string(),
            speech: "tts-1".to_string(),
        }
    }
}

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    models: Models,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct Transcription {
    text: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletion {
    fn into_content(self) -> Result<String, ApiError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ApiError::Empty)
    }
}

impl OpenAiClient {
    pub fn new(api_key: String, models: Models) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            models,
            http,
        }
    }

    /// Point the client at a different API root (proxies, compatible servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Request builder for the assistants endpoints, which need the beta header.
    fn assistants(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn post_assistants<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self
            .assistants(reqwest::Method::POST, path)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        read_json(response).await
    }

    async fn get_assistants<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .assistants(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        read_json(response).await
    }

    async fn chat_completion(&self, body: serde_json::Value) -> Result<String, ApiError> {
        let response = self
            .http
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        let completion: ChatCompletion = read_json(response).await?;
        completion.into_content()
    }
}

/// Check the status, then decode the body.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Http(format!("Failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(ApiError::Api {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))
}

#[async_trait]
impl AssistantBackend for OpenAiClient {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String, ApiError> {
        let mut body = serde_json::json!({
            "name": spec.name,
            "instructions": spec.instructions,
            "model": spec.model,
        });
        if let Some(ref store) = spec.vector_store_id {
            body["tools"] = serde_json::json!([{"type": "file_search"}]);
            body["tool_resources"] = serde_json::json!({
                "file_search": {"vector_store_ids": [store]}
            });
        }
        let created: IdOnly = self.post_assistants("assistants", body).await?;
        info!("Created assistant {}", created.id);
        Ok(created.id)
    }

    async fn create_thread(&self) -> Result<String, ApiError> {
        let thread: IdOnly = self.post_assistants("threads", serde_json::json!({})).await?;
        debug!("Created thread {}", thread.id);
        Ok(thread.id)
    }

    async fn post_message(&self, thread_id: &str, role: Role, content: &str) -> Result<(), ApiError> {
        let _: IdOnly = self
            .post_assistants(
                &format!("threads/{thread_id}/messages"),
                serde_json::json!({"role": role.as_str(), "content": content}),
            )
            .await?;
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        tools: Option<&[ToolDefinition]>,
    ) -> Result<Run, ApiError> {
        let mut body = serde_json::json!({"assistant_id": assistant_id});
        if let Some(tools) = tools {
            body["tools"] = serde_json::to_value(tools).map_err(|e| ApiError::Parse(e.to_string()))?;
        }
        self.post_assistants(&format!("threads/{thread_id}/runs"), body).await
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError> {
        self.get_assistants(&format!("threads/{thread_id}/runs/{run_id}")).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError> {
        let list: MessageList = self
            .get_assistants(&format!("threads/{thread_id}/messages?order=desc&limit=20"))
            .await?;
        Ok(list.data)
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, ApiError> {
        self.post_assistants(
            &format!("threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            serde_json::json!({"tool_outputs": outputs}),
        )
        .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), ApiError> {
        let run: Run = self
            .post_assistants(
                &format!("threads/{thread_id}/runs/{run_id}/cancel"),
                serde_json::json!({}),
            )
            .await?;
        debug!("Run {} is now {}", run.id, run.status);
        Ok(())
    }

    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, ApiError> {
        debug!("Transcribing {} bytes of audio", audio.len());
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/ogg")
            .map_err(|e| ApiError::Http(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.models.transcription.clone())
            .part("file", part);

        let response = self
            .http
            .post(self.url("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        let transcription: Transcription = read_json(response).await?;
        Ok(transcription.text)
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ApiError> {
        let response = self
            .http
            .post(self.url("audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.models.speech,
                "voice": voice,
                "input": text,
                "response_format": "opus",
            }))
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Api { status, body });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| ApiError::Http(format!("Failed to read speech: {e}")))?;
        if audio.is_empty() {
            return Err(ApiError::Empty);
        }
        debug!("Got {} bytes of speech", audio.len());
        Ok(audio.to_vec())
    }

    async fn describe_image(&self, prompt: &str, image_url: &str) -> Result<String, ApiError> {
        self.chat_completion(serde_json::json!({
            "model": self.models.vision,
            "max_tokens": 10,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": image_url}}
                ]
            }]
        }))
        .await
    }

    async fn judge(&self, rubric: &str, text: &str) -> Result<String, ApiError> {
        self.chat_completion(serde_json::json!({
            "model": self.models.judge,
            "messages": [
                {"role": "system", "content": rubric},
                {"role": "user", "content": text}
            ],
            "response_format": {"type": "json_object"}
        }))
        .await
    }
}
