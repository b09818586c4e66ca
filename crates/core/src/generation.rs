//! Calls the external text generator with bounded retry, and cleans its output.

use providers::{ChatMessage, LlmProvider, ProviderError};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1500,
            max_attempts: 3,
            retry_base: Duration::from_millis(500),
        }
    }
}

/// Result of a generation call once retries are exhausted. A failure is a
/// service condition to be reported to the user, never a panic.
#[derive(Debug)]
pub enum GenerationOutcome {
    Completed(String),
    Failed(ProviderError),
}

const MAX_BACKOFF: Duration = Duration::from_secs(8);

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << attempt.min(5)).min(MAX_BACKOFF)
}

pub async fn generate_with_retry(
    llm: &dyn LlmProvider,
    messages: &[ChatMessage],
    params: &GenerationParams,
) -> GenerationOutcome {
    let attempts = params.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match llm
            .generate(messages, params.temperature, params.max_tokens)
            .await
        {
            Ok(text) => return GenerationOutcome::Completed(text),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let delay = backoff(params.retry_base, attempt);
                attempt += 1;
                warn!(attempt, ?delay, "generation failed, retrying: {}", err);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return GenerationOutcome::Failed(err),
        }
    }
}

/// User-facing text for a generation failure.
pub fn failure_message(err: &ProviderError) -> String {
    let text = err.to_string();
    let lower = text.to_lowercase();
    if lower.contains("credit balance")
        || lower.contains("insufficient credits")
        || lower.contains("quota")
    {
        "Generation service credits exhausted. Please add credits or configure a different API key."
            .to_string()
    } else {
        format!("Error: {}", text)
    }
}

const ARTIFACTS: &[&str] = &[
    "<s>",
    "</s>",
    "[INST]",
    "[/INST]",
    "<|im_start|>",
    "<|im_end|>",
    "<|eot_id|>",
    "<|end|>",
];

/// Strips chat-template tokens and a leading echo of the response label.
pub fn postprocess(raw: &str) -> String {
    let mut text = raw.to_string();
    for token in ARTIFACTS {
        text = text.replace(token, "");
    }
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("Educational Response:")
        .unwrap_or(trimmed)
        .trim();
    trimmed.to_string()
}
