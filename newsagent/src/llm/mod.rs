use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

pub mod remote;
pub mod summarizer;

/// A hosted text-generation backend
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// One chat turn. Unset knobs fall back to the provider defaults.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

impl LlmRequest {
    pub fn with_system(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    /// Model name reported by the endpoint
    pub model: String,
}

#[derive(Debug, Clone, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

/// JSON payload of a model reply: a fenced block if present, else the span
/// from the first `{` to the last `}`.
pub fn extract_json_from_text(text: &str) -> Option<String> {
    if let Some(caps) = FENCED.captures(text) {
        let inner = caps[1].trim();
        if !inner.is_empty() {
            return Some(inner.to_string());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| text[start..=end].to_string())
}
