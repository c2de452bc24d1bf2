use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::RssFeedConfig;
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use reqwest::Client;
use scraper::Html;
use std::time::Duration;

use crate::models::{RawItem, SourceKind};
use crate::sources::Fetcher;

pub const USER_AGENT: &str = concat!("newsagent/", env!("CARGO_PKG_VERSION"));

/// Fetches a feed from the given URL and parses it.
/// A single attempt: transport errors and non-2xx statuses are returned to the caller.
pub async fn fetch_and_parse_feed(client: &Client, url: &str) -> Result<Feed> {
    let response = client
        .get(url)
        .send()
        .await
        .context("network error during feed fetch")?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("feed fetch failed with status: {}", status);
    }

    let bytes = response.bytes().await.context("failed to read response body")?;
    let feed = parser::parse(bytes.as_ref()).context("failed to parse feed")?;
    Ok(feed)
}

/// The fetch_rss stage backend
pub struct RssFetcher {
    client: Client,
}

impl RssFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Fetcher for RssFetcher {
    type Source = RssFeedConfig;

    fn stage(&self) -> &'static str {
        "fetch_rss"
    }

    fn describe(&self, source: &RssFeedConfig) -> String {
        source.name.clone()
    }

    async fn fetch(&self, source: &RssFeedConfig) -> Result<Vec<RawItem>> {
        let feed = fetch_and_parse_feed(&self.client, &source.url)
            .await
            .with_context(|| format!("rss feed {}", source.url))?;
        Ok(entries_to_items(feed.entries, source))
    }
}

/// Newest `limit` entries (undated ones last) as raw items.
pub fn entries_to_items(entries: Vec<Entry>, source: &RssFeedConfig) -> Vec<RawItem> {
    let mut dated: Vec<(Option<DateTime<Utc>>, Entry)> = entries
        .into_iter()
        .map(|e| (e.published.or(e.updated), e))
        .collect();
    // Stable: entries with equal dates keep feed order.
    dated.sort_by(|a, b| b.0.cmp(&a.0));

    dated
        .into_iter()
        .take(source.limit)
        .map(|(published_at, entry)| {
            let title = entry
                .title
                .as_ref()
                .map(|t| clean_html(&t.content))
                .unwrap_or_default();
            let raw_body = entry
                .summary
                .as_ref()
                .map(|s| s.content.clone())
                .filter(|s| !s.trim().is_empty())
                .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
                .unwrap_or_default();
            let url = entry.links.first().map(|l| l.href.clone()).unwrap_or_default();

            RawItem {
                title,
                body: clean_html(&raw_body),
                url,
                source_name: source.name.clone(),
                source_kind: SourceKind::Rss,
                category: source.category.clone(),
                published_at,
                keywords_matched: Vec::new(),
            }
        })
        .collect()
}

/// Strip tags and collapse whitespace.
pub fn clean_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: Vec<&str> = fragment.root_element().text().collect();
    text.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}
