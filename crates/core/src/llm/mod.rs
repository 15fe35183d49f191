//! LLM clients used by the extraction and fraud-check stages.

mod client;
mod groq;
mod ollama;
pub mod prompts;

pub use client::{
    CompletionRequest, CompletionResponse, ImageAttachment, LlmClient, LlmError, LlmUsage,
};
pub use groq::GroqClient;
pub use ollama::OllamaClient;
