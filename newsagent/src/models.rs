use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which fetch stage produced an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rss,
    WebPage,
    SocialMedia,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Rss => "RSS",
            SourceKind::WebPage => "Web Page",
            SourceKind::SocialMedia => "Social Media",
        }
    }
}

/// An unsummarized item retained by a fetch stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub title: String,
    /// Plain-text body (feed summary, page section, post text)
    pub body: String,
    pub url: String,
    pub source_name: String,
    pub source_kind: SourceKind,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Filled in by the keyword filter
    #[serde(default)]
    pub keywords_matched: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    /// Lenient label parsing: anything mentioning "positive" or "negative" wins, else neutral.
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        if lower.contains("positive") {
            Sentiment::Positive
        } else if lower.contains("negative") {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            Sentiment::Positive => "🟢 Positive",
            Sentiment::Neutral => "🟡 Neutral",
            Sentiment::Negative => "🔴 Negative",
        }
    }
}

/// A raw item plus the model's summary and sentiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizedItem {
    pub item: RawItem,
    pub summary: String,
    pub sentiment: Sentiment,
    /// True when `summary` is a fallback excerpt rather than model output
    pub degraded: bool,
}

/// A source that failed during a fetch stage and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSkip {
    pub stage: &'static str,
    pub source: String,
    pub reason: String,
}

impl std::fmt::Display for SourceSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: skipped {} ({})", self.stage, self.source, self.reason)
    }
}

/// Cut `text` to at most `max_chars` characters, appending "..." when shortened.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
