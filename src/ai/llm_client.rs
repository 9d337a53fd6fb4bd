//! Thin client over an OpenAI-chat-completions-shaped endpoint (spec §1
//! treats the LLM as an external collaborator; this is the wire boundary).
//! Grounded on the teacher's `reqwest` usage pattern for its webhook
//! dispatcher (`webhooks.rs`): a shared `reqwest::Client`, JSON body, and an
//! explicit per-call timeout rather than a client-wide one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &AppConfig) -> Self {
        LlmClient {
            http: reqwest::Client::new(),
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        }
    }

    /// Calls `/chat/completions` with an absolute deadline derived from the
    /// job's own deadline, never a fixed client timeout (spec §5).
    pub async fn complete(&self, messages: &[ChatMessage], deadline: Duration) -> Result<String, AppError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: 0.4,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(deadline)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                AppError::UpstreamTransient(format!("llm http {status}"))
            } else {
                AppError::UpstreamTerminal(format!("llm http {status}"))
            });
        }

        let parsed: ChatCompletionResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::UpstreamTerminal("llm returned no choices".into()))
    }
}
