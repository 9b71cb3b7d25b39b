//! Integration tests against the live OpenAI API.
//!
//! These tests require OPENAI_API_KEY and spend a few cents per run.
//!
//! Run with: cargo test --features integ_test --test openai_live

#[cfg(feature = "integ_test")]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use valuebot::assistant::tools::value_tools;
    use valuebot::assistant::{
        AssistantBackend, AssistantSpec, Gateway, Invocation, Models, MoodLabel, OpenAiClient, PollSettings,
        ValueValidator,
    };

    fn client() -> Option<Arc<OpenAiClient>> {
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => Some(Arc::new(OpenAiClient::new(key, Models::default()))),
            _ => {
                eprintln!("Skipping test: OPENAI_API_KEY not set");
                None
            }
        }
    }

    fn gateway(client: Arc<OpenAiClient>, assistant_id: String) -> Gateway {
        Gateway::new(
            client,
            assistant_id,
            value_tools(false),
            PollSettings {
                interval: Duration::from_millis(500),
                max_attempts: 120,
                max_wait: Duration::from_secs(60),
            },
            "nova".to_string(),
        )
    }

    async fn test_assistant(client: &OpenAiClient) -> String {
        let spec = AssistantSpec {
            name: "valuebot integration test".to_string(),
            instructions: "You help people name their personal values. When the user states a value, \
                           call save_value. Otherwise answer in one short sentence."
                .to_string(),
            model: "gpt-4o-mini".to_string(),
            vector_store_id: None,
        };
        client.create_assistant(&spec).await.expect("Failed to create assistant")
    }

    #[tokio::test]
    async fn test_judge_accepts_meaningful_value() {
        let Some(client) = client() else { return };
        let validator = ValueValidator::new(client);
        assert!(validator.validate("Telling the truth lets me build trust with others").await);
    }

    #[tokio::test]
    async fn test_judge_rejects_gibberish() {
        let Some(client) = client() else { return };
        let validator = ValueValidator::new(client);
        assert!(!validator.validate("x").await);
    }

    #[tokio::test]
    async fn test_question_gets_free_text_answer() {
        let Some(client) = client() else { return };
        let assistant_id = test_assistant(&client).await;
        let gw = gateway(client, assistant_id);

        match gw.identify_value(None, "What is anxiety?").await {
            Invocation::Answer(text) => assert!(!text.is_empty()),
            other => panic!("Expected an answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stated_value_triggers_save_value() {
        let Some(client) = client() else { return };
        let assistant_id = test_assistant(&client).await;
        let gw = gateway(client, assistant_id);

        let call = match gw
            .identify_value(None, "I value honesty because it lets me build trust with others")
            .await
        {
            Invocation::SaveValue(call) => call,
            other => panic!("Expected a save_value call, got {other:?}"),
        };
        assert!(!call.value.name.is_empty());
        assert!(gw.submit_tool_outcome(&call, true).await);
    }

    #[tokio::test]
    async fn test_speech_round_trip() {
        let Some(client) = client() else { return };
        let gw = gateway(client, String::new());

        let audio = gw.text_to_speech("Hello there").await.expect("Synthesis failed");
        assert!(!audio.is_empty());

        let text = gw.speech_to_text(audio).await.expect("Transcription failed");
        assert!(text.to_lowercase().contains("hello"), "got: {text}");
    }

    #[tokio::test]
    async fn test_mood_label_is_in_vocabulary() {
        let Some(client) = client() else { return };
        let gw = gateway(client, String::new());

        // 1x1 white PNG.
        let url = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8/x8AAwMCAO+ip1sAAAAASUVORK5CYII=";
        let _label: MoodLabel = gw.describe_image(url).await;
    }
}
