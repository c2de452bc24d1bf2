// Summarizer module
use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{LlmProvider, LlmRequest};
use crate::models::{excerpt, RawItem, Sentiment, SummarizedItem};

const SYSTEM_PROMPT: &str = r#"You are a news analyst assistant. Your task is to:
1. Summarize the given news content concisely (max 2-3 sentences)
2. Analyze the sentiment of the content as positive, negative, or neutral

Focus on the key facts and implications. Be objective in your analysis.

Respond with a JSON object containing:
- "summary": A brief summary of the content
- "sentiment": Either "positive", "negative", or "neutral""#;

/// Characters of item body sent to the model
const MAX_CONTENT_CHARS: usize = 4000;
/// Characters kept when falling back to an excerpt
pub const FALLBACK_EXCERPT_CHARS: usize = 300;

/// One model call per item; failures degrade the item instead of dropping it.
pub struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    max_words: usize,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, max_words: usize) -> Self {
        Self { provider, max_words }
    }

    pub async fn summarize(&self, item: RawItem) -> SummarizedItem {
        match self.analyze(&item).await {
            Ok(analysis) => {
                debug!(title = %item.title, sentiment = analysis.sentiment.as_str(), "item summarized");
                SummarizedItem {
                    item,
                    summary: analysis.summary,
                    sentiment: analysis.sentiment,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(title = %item.title, error = %format!("{:#}", e), "summarization failed, using excerpt");
                degrade(item)
            }
        }
    }

    async fn analyze(&self, item: &RawItem) -> Result<Analysis> {
        let content: String = item.body.chars().take(MAX_CONTENT_CHARS).collect();
        let prompt = format!(
            "Analyze this news content (summary should be max {} words):\n\nTitle: {}\n\nContent: {}",
            self.max_words, item.title, content
        );

        let response = self
            .provider
            .generate(LlmRequest::with_system(SYSTEM_PROMPT, prompt))
            .await?;
        parse_analysis(&response.content)
    }
}

/// Summary and sentiment parsed from a model reply
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub summary: String,
    pub sentiment: Sentiment,
}

#[derive(Debug, Deserialize)]
struct AnalysisJson {
    summary: Option<String>,
    sentiment: Option<String>,
}

pub fn parse_analysis(reply: &str) -> Result<Analysis> {
    let json = super::extract_json_from_text(reply)
        .context("No JSON object found in model response")?;
    let parsed: AnalysisJson = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse model analysis as JSON. Input was: {}", json))?;

    let summary = parsed
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .context("Model analysis has an empty summary")?;

    Ok(Analysis {
        summary,
        sentiment: parsed
            .sentiment
            .as_deref()
            .map(Sentiment::from_label)
            .unwrap_or_default(),
    })
}

/// Fallback when the model is unavailable or its reply is unusable.
pub fn degrade(item: RawItem) -> SummarizedItem {
    let source = if item.body.trim().is_empty() {
        &item.title
    } else {
        &item.body
    };
    let summary = excerpt(source, FALLBACK_EXCERPT_CHARS);
    SummarizedItem {
        summary: if summary.is_empty() { "(no content)".to_string() } else { summary },
        item,
        sentiment: Sentiment::Neutral,
        degraded: true,
    }
}
