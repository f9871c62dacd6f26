//! OpenAI-compatible chat completions client (POST {base}/chat/completions).

use crate::llm::{CompletionBackend, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Client for an OpenAI-compatible API. `base_url` includes the version segment (e.g. `/v1`).
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    verbose: bool,
    client: reqwest::Client,
}

/// Request message. Only single-turn user messages are ever sent.
#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    role: Option<String>,
    content: Option<String>,
    name: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, verbose: bool) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            verbose,
            client: reqwest::Client::new(),
        }
    }

    /// Single-turn chat: one user message, no history. Returns the first choice's content.
    pub async fn chat(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: ChatResponse = res.json().await?;
        let message = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .ok_or(LlmError::EmptyResponse)?;
        if self.verbose {
            log::info!(
                "completion response from {}: name={:?} role={:?} content={:?}",
                model,
                message.name.as_deref().unwrap_or(""),
                message.role.as_deref().unwrap_or(""),
                message.content.as_deref().unwrap_or("")
            );
        }
        Ok(message.content.unwrap_or_default())
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        self.chat(model, prompt).await
    }
}
