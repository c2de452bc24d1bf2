use anyhow::{Context, Result};
use common::WebPageConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use crate::models::{RawItem, SourceKind};
use crate::sources::Fetcher;

pub const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev";

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{2,3}\s+(.+)$").unwrap());
static BOLD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\*\*([^\]]+?)\*\*[^\]]*\]\((https?://[^)\s]+)\)").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]\((https?://[^)\s]+)\)").unwrap());

/// Scraping-service client (Firecrawl v2 `scrape` endpoint). Backend of fetch_web.
pub struct FirecrawlClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl FirecrawlClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: FIRECRAWL_API_URL.to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Scrape one page and return its main content as markdown.
    pub async fn scrape_markdown(&self, page: &WebPageConfig) -> Result<String> {
        let include_tags = page
            .selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "article")
            .map(|s| vec![s.to_string()]);

        let req_body = ScrapeRequest {
            url: page.url.clone(),
            formats: vec!["markdown"],
            only_main_content: true,
            include_tags,
            wait_for: (page.wait_for_ms > 0).then_some(page.wait_for_ms),
        };

        let endpoint = format!("{}/v2/scrape", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&req_body)
            .send()
            .await
            .context("Scrape HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Scrape API error {}: {}", status, body);
        }

        let resp_body: ScrapeResponse = response
            .json()
            .await
            .context("Failed to parse scrape response")?;

        if !resp_body.success {
            anyhow::bail!(
                "Scrape API reported failure: {}",
                resp_body.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }

        Ok(resp_body.data.and_then(|d| d.markdown).unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl Fetcher for FirecrawlClient {
    type Source = WebPageConfig;

    fn stage(&self) -> &'static str {
        "fetch_web"
    }

    fn describe(&self, source: &WebPageConfig) -> String {
        source.name.clone()
    }

    async fn fetch(&self, source: &WebPageConfig) -> Result<Vec<RawItem>> {
        let markdown = self
            .scrape_markdown(source)
            .await
            .with_context(|| format!("web page {}", source.url))?;
        if markdown.trim().is_empty() {
            debug!(page = %source.name, "scrape returned no markdown");
            return Ok(Vec::new());
        }
        Ok(markdown_to_items(&markdown, source))
    }
}

/// One article-like block cut out of a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub content: String,
    pub url: Option<String>,
}

pub fn markdown_to_items(markdown: &str, page: &WebPageConfig) -> Vec<RawItem> {
    let mut sections = split_markdown_into_sections(markdown, page.limit);
    if sections.is_empty() {
        sections.push(Section {
            title: extract_title(markdown).unwrap_or_else(|| page.name.clone()),
            content: markdown.trim().to_string(),
            url: None,
        });
    }

    sections
        .into_iter()
        .map(|s| RawItem {
            title: if s.title.is_empty() { page.name.clone() } else { s.title },
            body: s.content,
            url: s.url.unwrap_or_else(|| page.url.clone()),
            source_name: page.name.clone(),
            source_kind: SourceKind::WebPage,
            category: page.category.clone(),
            published_at: None,
            keywords_matched: Vec::new(),
        })
        .collect()
}

/// Split on `##`/`###` headings; listing pages without headings fall back to
/// bold links (`[**Title**](url)`).
pub fn split_markdown_into_sections(markdown: &str, limit: usize) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;
    let mut body: Vec<&str> = Vec::new();

    for line in markdown.lines() {
        if let Some(caps) = HEADING.captures(line.trim_end()) {
            if let Some(section) = current.take() {
                sections.push(finish_section(section, &body));
                if sections.len() >= limit {
                    return sections;
                }
            }
            current = Some(Section {
                title: caps[1].trim().to_string(),
                content: String::new(),
                url: None,
            });
            body.clear();
        } else if current.is_some() {
            body.push(line);
        }
    }
    if let Some(section) = current {
        sections.push(finish_section(section, &body));
    }
    if !sections.is_empty() {
        sections.truncate(limit);
        return sections;
    }

    bold_link_sections(markdown, limit)
}

/// A heading section links to the first absolute URL in its body, if any.
fn finish_section(mut section: Section, body: &[&str]) -> Section {
    section.content = body.join("\n").trim().to_string();
    section.url = LINK.captures(&section.content).map(|c| c[1].to_string());
    section
}

fn bold_link_sections(markdown: &str, limit: usize) -> Vec<Section> {
    const NAVIGATION: [&str; 5] = ["explore", "view all", "see more", "learn more", "read more"];
    let mut seen = HashSet::new();
    let mut sections = Vec::new();

    for caps in BOLD_LINK.captures_iter(markdown) {
        let title = caps[1].trim();
        let url = caps[2].to_string();
        if title.chars().count() < 5 {
            continue;
        }
        let lower = title.to_lowercase();
        if NAVIGATION.iter().any(|w| lower.contains(w)) {
            continue;
        }
        if !seen.insert(url.clone()) {
            continue;
        }

        let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let context: String = markdown[end..].chars().take(500).collect();
        let content = context
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('[') && !l.starts_with('!'))
            .take(3)
            .collect::<Vec<_>>()
            .join(" ");

        sections.push(Section {
            title: title.to_string(),
            content: content.chars().take(300).collect(),
            url: Some(url),
        });
        if sections.len() >= limit {
            break;
        }
    }
    sections
}

/// First `#`/`##` heading, else the first non-empty line.
pub fn extract_title(markdown: &str) -> Option<String> {
    for line in markdown.lines().map(str::trim) {
        if let Some(t) = line.strip_prefix("# ").or_else(|| line.strip_prefix("## ")) {
            return Some(t.trim().to_string());
        }
    }
    markdown
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(100).collect())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest {
    url: String,
    formats: Vec<&'static str>,
    only_main_content: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(limit: usize) -> WebPageConfig {
        WebPageConfig {
            name: "Lab Blog".to_string(),
            url: "https://lab.example/blog".to_string(),
            selector: None,
            category: "research".to_string(),
            limit,
            wait_for_ms: 0,
        }
    }

    #[test]
    fn splits_on_headings() {
        let md = "intro text\n## First post\nbody one\n\n### Second post\nbody two\n## Third\n";
        let sections = split_markdown_into_sections(md, 5);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, "First post");
        assert_eq!(sections[0].content, "body one");
        assert_eq!(sections[1].content, "body two");
        assert_eq!(sections[2].content, "");
        assert!(sections[0].url.is_none());
    }

    #[test]
    fn heading_sections_take_first_link() {
        let md = "## Robot arm ships
See [the post](https://lab.example/arm) and [more](https://x.example)
## Plain
text
";
        let items = markdown_to_items(md, &page(5));
        assert_eq!(items[0].url, "https://lab.example/arm");
        assert_eq!(items[1].url, "https://lab.example/blog");
    }

    #[test]
    fn heading_sections_respect_limit() {
        let md = "## a\nx\n## b\ny\n## c\nz\n";
        assert_eq!(split_markdown_into_sections(md, 2).len(), 2);
    }

    #[test]
    fn falls_back_to_bold_links() {
        let md = "[**Laser cutting guide**](https://blog.example/1)\nA practical intro\n\
                  [**View all**](https://blog.example/all)\n\
                  [**Laser cutting guide**](https://blog.example/1)\n\
                  [**New fiber module**](https://blog.example/2)\n![cover](x.png)\nShipping now\n";
        let sections = split_markdown_into_sections(md, 5);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "Laser cutting guide");
        assert_eq!(sections[0].url.as_deref(), Some("https://blog.example/1"));
        assert!(sections[0].content.starts_with("A practical intro"));
        assert_eq!(sections[1].title, "New fiber module");
    }

    #[test]
    fn whole_page_when_unstructured() {
        let items = markdown_to_items("Just one paragraph about AI.", &page(5));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Just one paragraph about AI.");
        assert_eq!(items[0].url, "https://lab.example/blog");
        assert_eq!(items[0].source_kind, SourceKind::WebPage);
    }
}
