//! Generation boundary: the language-model completion call.
//!
//! The session engine hands a single structured [`PromptPayload`] across this
//! boundary and gets text back — or [`Error::GenerationFailed`], which covers
//! auth, rate-limit, and network failures uniformly; the engine does not need
//! provider-specific reasons.
//!
//! Providers:
//!
//! - **[`ExtractiveGenerator`]** (`provider = "extractive"`, the default) —
//!   returns the grounding context itself as the answer. No model, no
//!   network, fully deterministic; keeps the pipeline usable offline and is
//!   what the test suite drives.
//! - **[`OpenAiGenerator`]** (`provider = "openai"`) — chat completions with
//!   the same retry/backoff discipline as the embedding provider.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::models::{Citation, Message, Role};

/// Everything the generator gets to see, assembled by the session engine.
///
/// The generator is never handed raw session state — only this payload.
#[derive(Debug, Clone)]
pub struct PromptPayload {
    /// Fixed grounding instruction (see [`crate::session::SYSTEM_INSTRUCTION`]).
    pub system_instruction: String,
    /// Assembled context text the answer must be grounded in.
    pub context_text: String,
    /// Citations for the fragments inside `context_text`.
    pub citations: Vec<Citation>,
    /// Bounded window of recent conversation messages.
    pub history_window: Vec<Message>,
    /// The user's current question.
    pub question: String,
}

/// Trait for completion backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"` or `"extractive"`).
    fn model_name(&self) -> &str;

    /// Produce an answer for the prompt, or fail with
    /// [`Error::GenerationFailed`].
    async fn generate(&self, prompt: &PromptPayload) -> Result<String>;
}

/// Create the appropriate [`Generator`] based on configuration.
///
/// # Errors
///
/// [`Error::InvalidConfig`] for unknown provider names or missing settings.
pub fn create_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => Err(Error::InvalidConfig(format!(
            "unknown generator provider: '{}'",
            other
        ))),
    }
}

// ============ Extractive Provider ============

/// Offline generator that answers with the grounding context verbatim.
///
/// With the context assembler already selecting, ordering, and bounding the
/// most relevant fragments, surfacing them directly is a legitimate answer
/// mode for an offline tool — and trivially grounded.
pub struct ExtractiveGenerator;

#[async_trait]
impl Generator for ExtractiveGenerator {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, prompt: &PromptPayload) -> Result<String> {
        Ok(prompt.context_text.clone())
    }
}

// ============ OpenAI Provider ============

/// Completion provider using the OpenAI chat completions API.
///
/// The API key is read from `OPENAI_API_KEY` at construction and held by the
/// provider; it is a constructor parameter of the session that owns this
/// generator, never ambient process state.
pub struct OpenAiGenerator {
    model: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::InvalidConfig("generator.model required for the openai provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            Error::GenerationFailed("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::GenerationFailed(e.to_string()))?;

        Ok(Self {
            model,
            api_key,
            client,
            max_retries: config.max_retries,
        })
    }

    fn build_messages(&self, prompt: &PromptPayload) -> Vec<serde_json::Value> {
        let system = format!(
            "{}\n\nContext:\n{}",
            prompt.system_instruction, prompt.context_text
        );

        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": system,
        })];

        for msg in &prompt.history_window {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(serde_json::json!({
                "role": role,
                "content": msg.text,
            }));
        }

        messages.push(serde_json::json!({
            "role": "user",
            "content": prompt.question,
        }));

        messages
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &PromptPayload) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": self.build_messages(prompt),
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::GenerationFailed(e.to_string()))?;
                        return parse_completion(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(status = %status, attempt, "generation retryable failure");
                        last_err = Some(Error::GenerationFailed(format!(
                            "OpenAI API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    return Err(Error::GenerationFailed(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "generation network failure");
                    last_err = Some(Error::GenerationFailed(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::GenerationFailed("generation failed after retries".into())))
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| {
            Error::GenerationFailed("invalid OpenAI response: missing completion text".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> PromptPayload {
        PromptPayload {
            system_instruction: "Answer from context only.".to_string(),
            context_text: "Snowpark lets you write data pipelines.".to_string(),
            citations: Vec::new(),
            history_window: vec![
                Message::user("earlier question"),
                Message::assistant("earlier answer", Vec::new()),
            ],
            question: "What is Snowpark?".to_string(),
        }
    }

    #[tokio::test]
    async fn test_extractive_returns_context() {
        let gen = ExtractiveGenerator;
        let answer = gen.generate(&payload()).await.unwrap();
        assert_eq!(answer, "Snowpark lets you write data pipelines.");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut cfg = GeneratorConfig::default();
        cfg.provider = "oracle".to_string();
        assert!(matches!(
            create_generator(&cfg),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "hello");

        let bad = serde_json::json!({"choices": []});
        assert!(matches!(
            parse_completion(&bad),
            Err(Error::GenerationFailed(_))
        ));
    }
}
