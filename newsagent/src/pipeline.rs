use anyhow::{Context, Result};
use common::Config;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::filter::KeywordFilter;
use crate::history::{HistoryStore, NoHistory};
use crate::ingestion::RssFetcher;
use crate::llm::summarizer::{degrade, Summarizer};
use crate::models::{RawItem, SourceSkip, SummarizedItem};
use crate::report::Report;
use crate::scraping::FirecrawlClient;
use crate::sink::{PublishOutcome, ReportSink};
use crate::social::{build_queries, TavilyClient};
use crate::sources::collect;

const RSS_TIMEOUT_SECS: u64 = 30;

/// The fixed stage sequence of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchRss,
    FetchWeb,
    FetchSocial,
    Summarize,
    GenerateOutput,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::FetchRss,
        Stage::FetchWeb,
        Stage::FetchSocial,
        Stage::Summarize,
        Stage::GenerateOutput,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::FetchRss => "fetch_rss",
            Stage::FetchWeb => "fetch_web",
            Stage::FetchSocial => "fetch_social",
            Stage::Summarize => "summarize",
            Stage::GenerateOutput => "generate_output",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Stage::FetchRss => "Fetch RSS feeds",
            Stage::FetchWeb => "Scrape web pages",
            Stage::FetchSocial => "Search social media",
            Stage::Summarize => "Deduplicate and summarize",
            Stage::GenerateOutput => "Generate report",
        }
    }
}

/// Mermaid rendering of the stage graph.
pub fn workflow_diagram() -> String {
    let mut lines = vec!["graph TD".to_string(), "    start([start])".to_string()];
    let mut previous = "start".to_string();
    for stage in Stage::ALL {
        lines.push(format!(
            "    {} --> {}[\"{}\"]",
            previous,
            stage.name(),
            stage.description()
        ));
        previous = stage.name().to_string();
    }
    lines.push(format!("    {} --> finish([end])", previous));
    lines.join("\n")
}

/// Result of one completed run
#[derive(Debug)]
pub struct RunSummary {
    pub report: Report,
    pub outcome: PublishOutcome,
    pub skipped: Vec<SourceSkip>,
    pub degraded: usize,
}

/// Accumulated outputs, moved from stage to stage.
#[derive(Default)]
struct RunState {
    rss_items: Vec<RawItem>,
    web_items: Vec<RawItem>,
    social_items: Vec<RawItem>,
    summarized: Vec<SummarizedItem>,
    skipped: Vec<SourceSkip>,
    degraded_titles: Vec<String>,
    report: Option<Report>,
    outcome: Option<PublishOutcome>,
}

pub struct Pipeline {
    config: Config,
    filter: KeywordFilter,
    rss: RssFetcher,
    web: Option<FirecrawlClient>,
    social: Option<TavilyClient>,
    summarizer: Option<Summarizer>,
    history: Box<dyn HistoryStore>,
    sink: Box<dyn ReportSink>,
}

impl Pipeline {
    pub fn new(config: Config, keywords: Vec<String>, sink: Box<dyn ReportSink>) -> Result<Self> {
        Ok(Self {
            config,
            filter: KeywordFilter::new(keywords),
            rss: RssFetcher::new(RSS_TIMEOUT_SECS)?,
            web: None,
            social: None,
            summarizer: None,
            history: Box::new(NoHistory),
            sink,
        })
    }

    pub fn with_web(mut self, client: FirecrawlClient) -> Self {
        self.web = Some(client);
        self
    }

    pub fn with_social(mut self, client: TavilyClient) -> Self {
        self.social = Some(client);
        self
    }

    /// Without a summarizer items pass through with an excerpt as summary.
    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_history(mut self, history: Box<dyn HistoryStore>) -> Self {
        self.history = history;
        self
    }

    pub fn keywords(&self) -> &[String] {
        self.filter.keywords()
    }

    fn social_active(&self) -> bool {
        self.social.is_some() && self.config.social_enabled(self.filter.keywords())
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let mut state = RunState::default();

        for (step, stage) in Stage::ALL.iter().enumerate() {
            info!(
                stage = stage.name(),
                step = step + 1,
                of = Stage::ALL.len(),
                "{}",
                stage.description()
            );
            self.run_stage(*stage, &mut state)
                .await
                .with_context(|| format!("stage {} failed", stage.name()))?;
        }

        let report = state.report.context("report was not generated")?;
        let outcome = state.outcome.context("report was not published")?;
        Ok(RunSummary {
            report,
            outcome,
            skipped: state.skipped,
            degraded: state.summarized.iter().filter(|i| i.degraded).count(),
        })
    }

    async fn run_stage(&self, stage: Stage, state: &mut RunState) -> Result<()> {
        match stage {
            Stage::FetchRss => {
                let out = collect(&self.rss, &self.config.rss_feeds, &self.filter).await;
                state.rss_items = out.items;
                state.skipped.extend(out.skipped);
            }
            Stage::FetchWeb => match &self.web {
                Some(client) => {
                    let out = collect(client, &self.config.web_pages, &self.filter).await;
                    state.web_items = out.items;
                    state.skipped.extend(out.skipped);
                }
                None if !self.config.web_pages.is_empty() => {
                    warn!(pages = self.config.web_pages.len(), "no scraping client configured, web pages ignored");
                }
                None => {}
            },
            Stage::FetchSocial => {
                if let (true, Some(client)) = (self.social_active(), &self.social) {
                    let queries = build_queries(self.filter.keywords(), &self.config.social_media);
                    let out = collect(client, &queries, &self.filter).await;
                    state.social_items =
                        unique_by_url(out.items, self.config.output.max_items_per_source);
                    state.skipped.extend(out.skipped);
                }
            }
            Stage::Summarize => self.summarize(state).await,
            Stage::GenerateOutput => self.generate_output(state).await?,
        }
        Ok(())
    }

    async fn summarize(&self, state: &mut RunState) {
        let seen = match self.history.load().await {
            Ok(seen) => seen,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "failed to load history, continuing without it");
                HashSet::new()
            }
        };

        let intake: Vec<RawItem> = std::mem::take(&mut state.rss_items)
            .into_iter()
            .chain(std::mem::take(&mut state.web_items))
            .chain(std::mem::take(&mut state.social_items))
            .collect();
        let fetched = intake.len();
        let items = dedupe(intake, &seen);
        info!(fetched, unique = items.len(), "items to summarize");

        for item in items {
            let summarized = match &self.summarizer {
                Some(summarizer) => summarizer.summarize(item).await,
                None => degrade(item),
            };
            if summarized.degraded && self.summarizer.is_some() {
                state.degraded_titles.push(summarized.item.title.clone());
            }
            state.summarized.push(summarized);
        }
    }

    async fn generate_output(&self, state: &mut RunState) -> Result<()> {
        let mut notes: Vec<String> = state.skipped.iter().map(|s| s.to_string()).collect();
        notes.extend(
            state
                .degraded_titles
                .iter()
                .map(|title| format!("summarize: used excerpt for \"{}\"", title)),
        );

        let urls: Vec<String> = state
            .summarized
            .iter()
            .map(|i| i.item.url.clone())
            .filter(|u| !u.is_empty())
            .collect();

        let report = Report::build(
            state.summarized.clone(),
            &self.config.category_order(self.social_active()),
            self.filter.keywords().to_vec(),
            notes,
            self.config.output.include_source_links,
        );

        let outcome = self
            .sink
            .publish(&report)
            .await
            .with_context(|| format!("{} sink failed", self.sink.name()))?;
        info!(sink = self.sink.name(), items = report.item_count(), "{}", outcome);

        if let Err(e) = self.history.record(&urls).await {
            warn!(error = %format!("{:#}", e), "failed to record history");
        }

        state.report = Some(report);
        state.outcome = Some(outcome);
        Ok(())
    }
}

/// First occurrence of each URL wins; URLs in `seen` are dropped.
/// Items without a URL are kept.
fn dedupe(items: Vec<RawItem>, seen: &HashSet<String>) -> Vec<RawItem> {
    let mut taken: HashSet<String> = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            if item.url.is_empty() {
                return true;
            }
            if seen.contains(&item.url) {
                debug!(url = %item.url, "already reported, skipping");
                return false;
            }
            taken.insert(item.url.clone())
        })
        .collect()
}

fn unique_by_url(items: Vec<RawItem>, cap: usize) -> Vec<RawItem> {
    let mut taken: HashSet<String> = HashSet::new();
    items
        .into_iter()
        .filter(|item| taken.insert(item.url.clone()))
        .take(cap)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    fn item(url: &str) -> RawItem {
        RawItem {
            title: format!("AI at {}", url),
            body: String::new(),
            url: url.to_string(),
            source_name: "test".to_string(),
            source_kind: SourceKind::SocialMedia,
            category: "social".to_string(),
            published_at: None,
            keywords_matched: Vec::new(),
        }
    }

    #[test]
    fn stages_run_in_fixed_order() {
        let names: Vec<&str> = Stage::ALL.iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec!["fetch_rss", "fetch_web", "fetch_social", "summarize", "generate_output"]
        );
    }

    #[test]
    fn diagram_chains_every_stage() {
        let diagram = workflow_diagram();
        assert!(diagram.starts_with("graph TD"));
        assert!(diagram.contains("start --> fetch_rss"));
        assert!(diagram.contains("fetch_social --> summarize"));
        assert!(diagram.ends_with("generate_output --> finish([end])"));
    }

    #[test]
    fn dedupe_keeps_first_and_drops_history() {
        let seen: HashSet<String> = ["https://old.example".to_string()].into_iter().collect();
        let items = vec![
            item("https://a.example"),
            item("https://old.example"),
            item("https://a.example"),
            item(""),
            item("https://b.example"),
        ];
        let urls: Vec<String> = dedupe(items, &seen).into_iter().map(|i| i.url).collect();
        assert_eq!(urls, vec!["https://a.example", "", "https://b.example"]);
    }

    #[test]
    fn social_items_are_unique_and_capped() {
        let items = vec![
            item("https://x.com/a/status/1"),
            item("https://x.com/a/status/1"),
            item("https://x.com/b/status/2"),
            item("https://x.com/c/status/3"),
        ];
        let urls: Vec<String> = unique_by_url(items, 2).into_iter().map(|i| i.url).collect();
        assert_eq!(urls, vec!["https://x.com/a/status/1", "https://x.com/b/status/2"]);
    }
}
