//! LLM client abstraction shared by the extraction and fraud-check stages.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Error type for LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Not configured")]
    NotConfigured,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// An image sent alongside the prompt, already base64 encoded.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    /// MIME type, e.g. "image/jpeg".
    pub media_type: String,
    pub base64: String,
}

/// Request for a completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt (instructions for the model)
    pub system: Option<String>,
    /// User message
    pub prompt: String,
    /// Optional image attachment for vision-capable models
    pub image: Option<ImageAttachment>,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            image: None,
            max_tokens: 1024,
            temperature: 0.0, // Deterministic by default for scoring tasks
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, media_type: impl Into<String>, base64: impl Into<String>) -> Self {
        self.image = Some(ImageAttachment {
            media_type: media_type.into(),
            base64: base64.into(),
        });
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Response from a completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The generated text
    pub text: String,
    /// Token usage
    pub usage: LlmUsage,
    /// Model used
    pub model: String,
}

/// Trait for LLM clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name (e.g., "groq", "ollama")
    fn provider(&self) -> &str;

    /// Model name (e.g., "llama-3.3-70b-versatile")
    fn model(&self) -> &str;

    /// Send a completion request and get a text response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Send a completion request and parse the response as JSON.
    async fn complete_json<T: DeserializeOwned>(
        &self,
        request: CompletionRequest,
    ) -> Result<(T, LlmUsage), LlmError> {
        let response = self.complete(request).await?;
        let parsed: T = serde_json::from_str(&response.text)
            .map_err(|e| LlmError::Json(format!("{}: {}", e, response.text)))?;
        Ok((parsed, response.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new("Score this receipt")
            .with_system("You are a fraud detection AI specialist.")
            .with_max_tokens(512)
            .with_temperature(0.2);

        assert_eq!(request.prompt, "Score this receipt");
        assert_eq!(
            request.system,
            Some("You are a fraud detection AI specialist.".to_string())
        );
        assert_eq!(request.max_tokens, 512);
        assert_eq!(request.temperature, 0.2);
        assert!(request.image.is_none());
    }

    #[test]
    fn test_completion_request_defaults_deterministic() {
        let request = CompletionRequest::new("hello");
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.max_tokens, 1024);
    }

    #[test]
    fn test_completion_request_with_image() {
        let request = CompletionRequest::new("read this").with_image("image/png", "aGVsbG8=");
        let image = request.image.unwrap();
        assert_eq!(image.media_type, "image/png");
        assert_eq!(image.base64, "aGVsbG8=");
    }
}
