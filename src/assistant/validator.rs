//! Second-opinion check on a value description before it is saved.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::assistant::AssistantBackend;

const RUBRIC: &str = r#"Validate if the input is a legitimate personal value.
Return JSON: {"valid": boolean}
Criteria:
1. Minimum 3 words
2. No offensive content
3. Meaningful concept"#;

#[derive(Deserialize)]
struct Verdict {
    valid: Option<bool>,
}

/// Judges descriptions with a fixed rubric. Fails closed.
pub struct ValueValidator {
    backend: Arc<dyn AssistantBackend>,
}

impl ValueValidator {
    pub fn new(backend: Arc<dyn AssistantBackend>) -> Self {
        Self { backend }
    }

    /// `true` only when the judge explicitly answers `{"valid": true}`.
    pub async fn validate(&self, description: &str) -> bool {
        if description.trim().is_empty() {
            return false;
        }

        match self.backend.judge(RUBRIC, description).await {
            Ok(raw) => {
                let valid = parse_verdict(&raw);
                let preview: String = description.chars().take(50).collect();
                info!("Judge: \"{}\" -> valid={}", preview, valid);
                valid
            }
            Err(e) => {
                warn!("Validation error: {e}");
                false
            }
        }
    }
}

fn parse_verdict(raw: &str) -> bool {
    match serde_json::from_str::<Verdict>(raw) {
        Ok(verdict) => verdict.valid.unwrap_or(false),
        Err(e) => {
            warn!("Unreadable verdict {:?}: {e}", raw);
            false
        }
    }
}
