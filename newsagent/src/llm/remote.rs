use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

/// Chat-completions client for any OpenAI-compatible endpoint
/// (Gemini's compatibility endpoint by default).
pub struct RemoteLlmProvider {
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
    max_tokens: usize,
    temperature: f32,
    json_mode: bool,
    http: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(30),
            max_tokens: 512,
            temperature: 0.3,
            json_mode: false,
            http: reqwest::Client::new(),
        }
    }

    /// Fallbacks for requests that leave these unset.
    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: usize, temperature: f32) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Ask the endpoint for a JSON object reply (`response_format`).
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map_or(self.timeout, Duration::from_secs);

        let messages: Vec<ChatMessage<'_>> = request
            .system
            .as_deref()
            .map(|content| ChatMessage { role: "system", content })
            .into_iter()
            .chain(std::iter::once(ChatMessage {
                role: "user",
                content: &request.prompt,
            }))
            .collect();

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
            response_format: self.json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(timeout_aware)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, text);
        }

        let parsed: ChatResponse = response.json().await.map_err(timeout_aware)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .context("LLM response has no choices")?
            .message
            .content
            .unwrap_or_default();

        let usage = parsed.usage.unwrap_or_default();
        Ok(LlmResponse {
            content,
            usage: UsageMetadata {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

fn timeout_aware(err: reqwest::Error) -> anyhow::Error {
    if err.is_timeout() {
        anyhow::Error::new(err).context("LLM request timed out")
    } else if err.is_decode() {
        anyhow::Error::new(err).context("Failed to parse LLM response")
    } else {
        anyhow::Error::new(err).context("LLM HTTP request failed")
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}
