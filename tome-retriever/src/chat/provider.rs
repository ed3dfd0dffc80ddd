//! Chat-completion collaborator.
//!
//! [`ChatProvider`] is the seam for answer synthesis; the shipped
//! implementation speaks the OpenAI-compatible `/chat/completions` protocol
//! (DashScope, OpenAI, vLLM, and friends all expose it).

use crate::config::ChatConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable consulted for the API key when the config leaves it
/// unset.
pub const API_KEY_ENV: &str = "TOME_API_KEY";

/// Collaborator interface for turning a prompt into an answer.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Complete `prompt` into an answer.
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;

    /// Model name, for stats reporting.
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat-completion client.
pub struct OpenAiCompatChat {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
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

impl OpenAiCompatChat {
    /// Build a client from configuration. The API key comes from the config
    /// or the [`API_KEY_ENV`] environment variable.
    pub fn new(config: &ChatConfig) -> anyhow::Result<Self> {
        let api_key = match &config.api_key {
            Some(key) => key.clone(),
            None => std::env::var(API_KEY_ENV).map_err(|_| {
                anyhow::anyhow!(
                    "no chat API key configured; set chat.api_key or the {API_KEY_ENV} \
                     environment variable"
                )
            })?,
        };

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatChat {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            top_p: self.top_p,
        };

        debug!(
            "requesting completion from {} (prompt: {} bytes)",
            self.model,
            prompt.len()
        );
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: CompletionResponse = response.json().await?;
        let answer = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("chat completion returned no choices"))?;
        Ok(answer)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
