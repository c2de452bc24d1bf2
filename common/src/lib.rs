/*!
common/src/lib.rs

Shared configuration types and loaders for newsagent.

This file provides:
- Source definitions and output options (deserialized from TOML)
- An async loader that merges an optional default file under an override file
- Environment settings carrying the API credentials of each stage
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default location of the sources file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "./config/sources.toml";

/// Category assigned to social search results
pub const SOCIAL_CATEGORY: &str = "social";

/// One RSS/Atom feed to poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssFeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    /// Max number of (newest) entries considered per run
    #[serde(default = "default_feed_limit")]
    pub limit: usize,
}

/// One web page scraped through the scraping service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPageConfig {
    pub name: String,
    pub url: String,
    /// CSS selector restricting the extracted content ("article" means whole main content)
    pub selector: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
    /// Milliseconds the scraper waits for client-side rendering (0 = no wait)
    #[serde(default)]
    pub wait_for_ms: u64,
}

/// Social search scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialMediaConfig {
    #[serde(default = "default_platforms")]
    pub platforms: Vec<String>,
    /// Only the first `max_queries` keywords are searched
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_time_range")]
    pub time_range: String,
}

impl Default for SocialMediaConfig {
    fn default() -> Self {
        Self {
            platforms: default_platforms(),
            max_queries: default_max_queries(),
            max_results: default_max_results(),
            time_range: default_time_range(),
        }
    }
}

/// Report rendering and history options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_true")]
    pub include_source_links: bool,
    #[serde(default = "default_max_items")]
    pub max_items_per_source: usize,
    #[serde(default = "default_summary_words")]
    pub summary_max_words: usize,
    /// Days a processed URL is remembered by the local history file
    #[serde(default = "default_history_days")]
    pub history_days: u64,
    /// Categories listed here come first in the report, in this order
    #[serde(default)]
    pub category_order: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            include_source_links: true,
            max_items_per_source: default_max_items(),
            summary_max_words: default_summary_words(),
            history_days: default_history_days(),
            category_order: Vec::new(),
        }
    }
}

/// Remote LLM config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl LlmConfig {
    pub const DEFAULT_API_URL: &'static str =
        "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
    pub const DEFAULT_API_KEY_ENV: &'static str = "GOOGLE_API_KEY";
    pub const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(Self::DEFAULT_API_URL)
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(Self::DEFAULT_API_KEY_ENV)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(Self::DEFAULT_MODEL)
    }
}

/// Top-level sources configuration (deserialized from sources.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub rss_feeds: Vec<RssFeedConfig>,
    #[serde(default)]
    pub web_pages: Vec<WebPageConfig>,
    #[serde(default)]
    pub social_media: SocialMediaConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config/sources.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read override config: {}", path.display()))?;
            let val: toml::Value =
                toml::from_str(&data).context("Failed to parse override configuration")?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject source definitions that could never be fetched.
    pub fn validate(&self) -> Result<()> {
        for feed in &self.rss_feeds {
            check_source("rss feed", &feed.name, &feed.url, feed.limit)?;
        }
        for page in &self.web_pages {
            check_source("web page", &page.name, &page.url, page.limit)?;
        }
        if self.social_media.platforms.iter().any(|p| p.trim().is_empty()) {
            anyhow::bail!("social_media.platforms contains an empty domain");
        }
        Ok(())
    }

    /// Whether the social stage has anything to query.
    pub fn social_enabled(&self, keywords: &[String]) -> bool {
        !self.social_media.platforms.is_empty()
            && self.social_media.max_queries > 0
            && keywords.iter().any(|k| !k.trim().is_empty())
    }

    /// Report category order: explicit `output.category_order`, then categories as
    /// declared by rss feeds and web pages, then the social category.
    pub fn category_order(&self, include_social: bool) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let configured = self
            .output
            .category_order
            .iter()
            .chain(self.rss_feeds.iter().map(|f| &f.category))
            .chain(self.web_pages.iter().map(|p| &p.category));
        for category in configured {
            if !order.iter().any(|c| c == category) {
                order.push(category.clone());
            }
        }
        if include_social && !order.iter().any(|c| c == SOCIAL_CATEGORY) {
            order.push(SOCIAL_CATEGORY.to_string());
        }
        order
    }
}

fn check_source(kind: &str, name: &str, url: &str, limit: usize) -> Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!("{} with url {} has an empty name", kind, url);
    }
    url::Url::parse(url).with_context(|| format!("{} '{}' has an invalid url: {}", kind, name, url))?;
    if limit == 0 {
        anyhow::bail!("{} '{}' has limit = 0", kind, name);
    }
    Ok(())
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

fn default_category() -> String {
    "general".to_string()
}

fn default_feed_limit() -> usize {
    10
}

fn default_page_limit() -> usize {
    5
}

fn default_platforms() -> Vec<String> {
    vec!["x.com".to_string(), "reddit.com".to_string()]
}

fn default_max_queries() -> usize {
    10
}

fn default_max_results() -> usize {
    10
}

fn default_time_range() -> String {
    "day".to_string()
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_items() -> usize {
    10
}

fn default_summary_words() -> usize {
    150
}

fn default_history_days() -> u64 {
    7
}

/// Feishu Base (Bitable) credentials used by the tabular export
#[derive(Debug, Clone)]
pub struct FeishuCredentials {
    pub app_id: String,
    pub app_secret: String,
    pub app_token: String,
    pub table_id: String,
}

/// Environment-derived settings, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    vars: HashMap<String, String>,
    pub tavily_api_key: Option<String>,
    pub firecrawl_api_key: Option<String>,
    pub feishu: Option<FeishuCredentials>,
    pub config_path: PathBuf,
    pub output_dir: Option<String>,
}

impl Settings {
    pub const TAVILY_API_KEY: &'static str = "TAVILY_API_KEY";
    pub const FIRECRAWL_API_KEY: &'static str = "FIRECRAWL_API_KEY";

    /// Snapshot the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build settings from explicit key/value pairs (empty values count as unset).
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();

        let feishu = match (
            vars.get("FEISHU_APP_ID"),
            vars.get("FEISHU_APP_SECRET"),
            vars.get("FEISHU_BASE_APP_TOKEN"),
            vars.get("FEISHU_BASE_TABLE_ID"),
        ) {
            (Some(app_id), Some(app_secret), Some(app_token), Some(table_id)) => {
                Some(FeishuCredentials {
                    app_id: app_id.clone(),
                    app_secret: app_secret.clone(),
                    app_token: app_token.clone(),
                    table_id: table_id.clone(),
                })
            }
            _ => None,
        };

        Self {
            tavily_api_key: vars.get(Self::TAVILY_API_KEY).cloned(),
            firecrawl_api_key: vars.get(Self::FIRECRAWL_API_KEY).cloned(),
            feishu,
            config_path: vars
                .get("CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            output_dir: vars.get("OUTPUT_DIR").cloned(),
            vars,
        }
    }

    /// Look up any variable captured at startup (e.g. the configured LLM key variable).
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Like [`Settings::var`] but a missing value is a configuration error.
    pub fn require(&self, name: &str, needed_for: &str) -> Result<String> {
        self.var(name)
            .map(str::to_string)
            .with_context(|| format!("{} is not set (required for {})", name, needed_for))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = r#"
        keywords = ["AI", "robotics"]

        [[rss_feeds]]
        name = "Example Feed"
        url = "https://example.com/feed.xml"
        category = "tech_news"

        [[web_pages]]
        name = "Lab Blog"
        url = "https://example.com/blog"
        selector = "main"
        category = "research"

        [[web_pages]]
        name = "Other Blog"
        url = "https://example.org/blog"
        category = "tech_news"

        [social_media]
        platforms = ["reddit.com"]
    "#;

    #[test]
    fn parses_sources_with_defaults() {
        let cfg: Config = toml::from_str(SAMPLE).expect("parse config");
        assert_eq!(cfg.keywords, vec!["AI", "robotics"]);
        assert_eq!(cfg.rss_feeds.len(), 1);
        assert_eq!(cfg.rss_feeds[0].limit, 10);
        assert_eq!(cfg.web_pages[0].selector.as_deref(), Some("main"));
        assert_eq!(cfg.web_pages[1].category, "tech_news");
        assert_eq!(cfg.web_pages[1].limit, 5);
        assert_eq!(cfg.social_media.platforms, vec!["reddit.com"]);
        assert_eq!(cfg.social_media.max_queries, 10);
        assert_eq!(cfg.output.dir, "./output");
        assert_eq!(cfg.output.history_days, 7);
        assert_eq!(cfg.llm.model(), "gemini-2.0-flash");
        cfg.validate().expect("valid");
    }

    #[test]
    fn empty_document_is_a_valid_config() {
        let cfg: Config = toml::from_str("").expect("parse empty");
        assert!(cfg.keywords.is_empty());
        assert_eq!(cfg.social_media.platforms, vec!["x.com", "reddit.com"]);
        assert!(!cfg.social_enabled(&cfg.keywords));
    }

    #[test]
    fn category_order_follows_declaration() {
        let mut cfg: Config = toml::from_str(SAMPLE).expect("parse config");
        assert_eq!(
            cfg.category_order(true),
            vec!["tech_news", "research", "social"]
        );
        cfg.output.category_order = vec!["research".to_string()];
        assert_eq!(cfg.category_order(false), vec!["research", "tech_news"]);
    }

    #[test]
    fn rejects_invalid_url() {
        let toml = r#"
            [[rss_feeds]]
            name = "Broken"
            url = "not a url"
        "#;
        let cfg: Config = toml::from_str(toml).expect("parse config");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("invalid url"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Config::from_file(dir.path().join("nope.toml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn override_file_wins_over_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let defaults = dir.path().join("config.default.toml");
        let overrides = dir.path().join("sources.toml");
        fs::write(
            &defaults,
            "keywords = [\"default\"]\n[output]\ndir = \"/tmp/reports\"\nsummary_max_words = 80\n",
        )
        .expect("write defaults");
        fs::write(&overrides, "keywords = [\"AI\"]\n[output]\nsummary_max_words = 40\n")
            .expect("write overrides");

        let cfg = Config::load_with_defaults(Some(&defaults), Some(&overrides))
            .await
            .expect("load config");
        assert_eq!(cfg.keywords, vec!["AI"]);
        assert_eq!(cfg.output.dir, "/tmp/reports");
        assert_eq!(cfg.output.summary_max_words, 40);
    }

    #[test]
    fn settings_ignore_blank_values() {
        let settings = Settings::from_vars([
            ("TAVILY_API_KEY", "tvly-123"),
            ("FIRECRAWL_API_KEY", "  "),
            ("FEISHU_APP_ID", "cli_1"),
            ("OUTPUT_DIR", "/srv/reports"),
        ]);
        assert_eq!(settings.tavily_api_key.as_deref(), Some("tvly-123"));
        assert!(settings.firecrawl_api_key.is_none());
        assert!(settings.feishu.is_none());
        assert_eq!(settings.output_dir.as_deref(), Some("/srv/reports"));
        assert_eq!(settings.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));

        let err = settings.require("GOOGLE_API_KEY", "summarize").unwrap_err();
        assert!(err.to_string().contains("GOOGLE_API_KEY"));
    }
}
