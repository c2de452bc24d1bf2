use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{SocialMediaConfig, SOCIAL_CATEGORY};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{excerpt, RawItem, SourceKind};
use crate::sources::Fetcher;

pub const TAVILY_API_URL: &str = "https://api.tavily.com";

/// Search API query length limit
const MAX_QUERY_CHARS: usize = 400;
const MIN_SCORE: f64 = 0.3;
const MIN_SCORE_X: f64 = 0.2;
const MAX_BODY_CHARS: usize = 2000;
const MIN_POST_CHARS: usize = 30;
const MIN_TITLE_CHARS: usize = 10;
const MIN_CONTENT_CHARS: usize = 50;
/// Lines this short are engagement counters or button labels.
const MIN_POST_LINE_CHARS: usize = 21;

/// Page panels that run until the next "Conversation" or "Post" line
const X_CHROME_PANELS: [&str; 4] = ["Trending now", "What's happening", "New to X?", "Terms of Service"];

static SUBREDDIT_HOME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^/]+/r/[^/]+/?$").unwrap());
static PROFILE_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\| profile\b|\| about\b|^profile:|^about:|\(@\w+\)\s*/\s*x$)").unwrap()
});

static X_CHROME_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:don't miss what's happening|people on x are the first to know|",
        r"\[?log in\b|\[?sign up\b|by signing up|create account|",
        r"trending(?: in\b|:)|privacy policy|cookie policy|accessibility|ads info|more$|",
        r"© \d{4} x corp|\[show more\]|[\d,.]+[km]?\s*posts?$|",
        r"(?:politics|sports|entertainment) · trending|\|$|read \d+ repl(?:y|ies)$|\d+$)"
    ))
    .unwrap()
});
static X_PROFILE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[.*\]\(https://x\.com/\w+\)$").unwrap());
static X_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\d+:\d+ [AP]M · \w+ \d+, \d+\]").unwrap());
static PROFILE_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^\s*profile page|^\s*bio:|^\s*follower.* following|",
        r"shows? (?:his|her|their) bio|displays? (?:his|her|their) (?:follower|bio)"
    ))
    .unwrap()
});

/// One keyword query scoped to the configured social domains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialQuery {
    pub query: String,
    pub platforms: Vec<String>,
}

/// One query per keyword (first `max_queries` keywords), truncated to the API limit.
pub fn build_queries(keywords: &[String], config: &SocialMediaConfig) -> Vec<SocialQuery> {
    if config.platforms.is_empty() {
        return Vec::new();
    }
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .take(config.max_queries)
        .map(|k| SocialQuery {
            query: truncate_query(k),
            platforms: config.platforms.clone(),
        })
        .collect()
}

fn truncate_query(query: &str) -> String {
    if query.chars().count() <= MAX_QUERY_CHARS {
        return query.to_string();
    }
    let cut: String = query.chars().take(MAX_QUERY_CHARS - 3).collect();
    format!("{}...", cut)
}

/// Search-API client (Tavily `search` endpoint). Backend of fetch_social.
pub struct TavilyClient {
    base_url: String,
    api_key: String,
    max_results: usize,
    time_range: String,
    client: Client,
}

impl TavilyClient {
    pub fn new(api_key: impl Into<String>, config: &SocialMediaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: TAVILY_API_URL.to_string(),
            api_key: api_key.into(),
            max_results: config.max_results,
            time_range: config.time_range.clone(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn search(&self, query: &SocialQuery) -> Result<Vec<SearchResult>> {
        let req_body = SearchRequest {
            query: &query.query,
            search_depth: "advanced",
            topic: "general",
            max_results: self.max_results,
            include_domains: &query.platforms,
            time_range: &self.time_range,
            include_raw_content: true,
        };

        let endpoint = format!("{}/search", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&req_body)
            .send()
            .await
            .context("Search HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Search API error {}: {}", status, body);
        }

        let resp_body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse search response")?;
        Ok(resp_body.results)
    }
}

#[async_trait::async_trait]
impl Fetcher for TavilyClient {
    type Source = SocialQuery;

    fn stage(&self) -> &'static str {
        "fetch_social"
    }

    fn describe(&self, source: &SocialQuery) -> String {
        format!("'{}' on {}", source.query, source.platforms.join(", "))
    }

    async fn fetch(&self, source: &SocialQuery) -> Result<Vec<RawItem>> {
        let results = self.search(source).await?;
        Ok(results.into_iter().filter_map(result_to_item).collect())
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase()))
        .unwrap_or_default()
}

fn is_x_host(host: &str) -> bool {
    host == "x.com" || host == "twitter.com" || host.ends_with(".x.com") || host.ends_with(".twitter.com")
}

/// Profile, about and subreddit landing pages carry no discussion content.
pub fn is_profile_or_listing(url: &str, title: &str) -> bool {
    let host = host_of(url);
    let url_lower = url.to_lowercase();
    let title_lower = title.trim().to_lowercase();

    if is_x_host(&host) {
        if !url_lower.contains("/status/") {
            return true;
        }
        if title_lower.ends_with("/ x") || title_lower.contains("/ posts / x") {
            return true;
        }
    }

    if host.ends_with("reddit.com") {
        let is_user = url_lower.contains("/user/") || url_lower.contains("/u/");
        if is_user && !url_lower.contains("/comments/") {
            return true;
        }
        if SUBREDDIT_HOME.is_match(&url_lower) {
            return true;
        }
    }

    PROFILE_TITLE.is_match(&title_lower)
}

/// Strip X page chrome (login prompts, trending panels, footer links).
pub fn clean_x_content(raw: &str) -> String {
    let mut kept = Vec::new();
    let mut in_panel = false;
    for line in raw.lines() {
        let trimmed = line.trim();
        if X_CHROME_PANELS.iter().any(|marker| trimmed.contains(marker)) {
            in_panel = true;
        }
        if in_panel {
            if trimmed.starts_with("Conversation") || trimmed.starts_with("Post") {
                in_panel = false;
            }
            continue;
        }
        if !trimmed.is_empty() && !X_CHROME_LINE.is_match(trimmed) {
            kept.push(line);
        }
    }
    kept.join("\n").trim().to_string()
}

/// The post text of a scraped X status page, or "" when only chrome is left.
pub fn extract_post_text(raw: &str) -> String {
    let cleaned = clean_x_content(raw);
    if cleaned.chars().count() < MIN_CONTENT_CHARS {
        return String::new();
    }
    cleaned
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.starts_with("![Image")
                && !X_PROFILE_LINK.is_match(line)
                && !X_TIMESTAMP.is_match(line)
                && line.chars().count() >= MIN_POST_LINE_CHARS
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Discussion-sized title and body that do not read like a bio.
pub fn is_meaningful_content(title: &str, content: &str) -> bool {
    title.chars().count() >= MIN_TITLE_CHARS
        && content.chars().count() >= MIN_CONTENT_CHARS
        && !PROFILE_BODY.is_match(&content.to_lowercase())
}

fn source_name_for(host: &str) -> String {
    if is_x_host(host) {
        "X (Twitter)".to_string()
    } else if host.ends_with("reddit.com") {
        "Reddit".to_string()
    } else if host.is_empty() {
        "Social Media".to_string()
    } else {
        host.to_string()
    }
}

fn result_to_item(result: SearchResult) -> Option<RawItem> {
    let host = host_of(&result.url);
    let threshold = if is_x_host(&host) { MIN_SCORE_X } else { MIN_SCORE };
    if result.url.is_empty() || result.score < threshold {
        return None;
    }
    if is_profile_or_listing(&result.url, &result.title) {
        return None;
    }

    let raw = result
        .raw_content
        .filter(|c| !c.trim().is_empty())
        .or(result.content)
        .unwrap_or_default();
    let body = if is_x_host(&host) {
        let post = extract_post_text(&raw);
        if post.chars().count() < MIN_POST_CHARS {
            return None;
        }
        post
    } else {
        let text = raw.trim().to_string();
        if !is_meaningful_content(result.title.trim(), &text) {
            return None;
        }
        text
    };

    Some(RawItem {
        title: result.title.trim().to_string(),
        body: excerpt(&body, MAX_BODY_CHARS),
        url: result.url,
        source_name: source_name_for(&host),
        source_kind: SourceKind::SocialMedia,
        category: SOCIAL_CATEGORY.to_string(),
        published_at: result.published_date.as_deref().and_then(parse_published),
        keywords_matched: Vec::new(),
    })
}

fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    search_depth: &'static str,
    topic: &'static str,
    max_results: usize,
    include_domains: &'a [String],
    time_range: &'a str,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    content: Option<String>,
    raw_content: Option<String>,
    #[serde(default)]
    score: f64,
    published_date: Option<String>,
}
