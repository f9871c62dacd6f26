//! Completion service abstraction and OpenAI-compatible client.
//!
//! The relay only ever sends a single user message and reads back the assistant text, so the
//! backend contract is one call per attempt with no internal retry.

mod openai;

use async_trait::async_trait;

pub use openai::OpenAiClient;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion api error: {0}")]
    Api(String),
    #[error("no completion API key configured")]
    MissingApiKey,
    #[error("completion response contained no choices")]
    EmptyResponse,
}

/// One completion call against one model. Implementations must not retry internally.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, LlmError>;
}
