use anyhow::Result;
use common::{Config, OutputConfig, RssFeedConfig};
use std::sync::Arc;

use newsagent::history::LocalHistory;
use newsagent::llm::summarizer::Summarizer;
use newsagent::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use newsagent::models::Sentiment;
use newsagent::pipeline::Pipeline;
use newsagent::report::Report;
use newsagent::sink::{MarkdownFileSink, PublishOutcome, ReportSink};

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Tech Wire</title>
    <link>https://wire.example</link>
    <description>Tech news</description>
    <item>
      <title>New AI model tops benchmarks</title>
      <link>https://wire.example/ai-model</link>
      <description><![CDATA[<p>The lab released a <b>new</b> model.</p>]]></description>
      <pubDate>Tue, 30 Apr 2024 09:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Local bakery opens second shop</title>
      <link>https://wire.example/bakery</link>
      <description>Bread and pastries.</description>
      <pubDate>Mon, 29 Apr 2024 09:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

/// Replies with a fixed text for every request.
struct StubModel {
    reply: String,
}

#[async_trait::async_trait]
impl LlmProvider for StubModel {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Ok(LlmResponse {
            content: self.reply.clone(),
            usage: UsageMetadata::default(),
            model: "stub".to_string(),
        })
    }
}

/// A sink whose destination is unreachable.
struct UnreachableSink;

#[async_trait::async_trait]
impl ReportSink for UnreachableSink {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    async fn publish(&self, _report: &Report) -> Result<PublishOutcome> {
        anyhow::bail!("connection refused")
    }
}

fn summarizer(reply: &str) -> Summarizer {
    Summarizer::new(
        Arc::new(StubModel {
            reply: reply.to_string(),
        }),
        150,
    )
}

fn feed(name: &str, url: String) -> RssFeedConfig {
    RssFeedConfig {
        name: name.to_string(),
        url,
        category: "tech_news".to_string(),
        limit: 10,
    }
}

fn config(feeds: Vec<RssFeedConfig>) -> Config {
    Config {
        keywords: vec!["AI".to_string()],
        rss_feeds: feeds,
        ..Config::default()
    }
}

/// The mock lives as long as the returned handle.
async fn feed_server() -> (mockito::ServerGuard, mockito::Mock) {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(FEED)
        .expect_at_least(1)
        .create_async()
        .await;
    (server, mock)
}

#[tokio::test]
async fn single_feed_yields_one_summarized_item() {
    let (server, _feed) = feed_server().await;
    let dir = tempfile::tempdir().expect("tempdir");

    let pipeline = Pipeline::new(
        config(vec![feed("Tech Wire", format!("{}/feed.xml", server.url()))]),
        vec!["AI".to_string()],
        Box::new(MarkdownFileSink::new(dir.path())),
    )
    .expect("pipeline")
    .with_summarizer(summarizer(
        r#"{"summary": "A new model leads the benchmarks.", "sentiment": "positive"}"#,
    ));

    let summary = pipeline.run().await.expect("run");

    assert_eq!(summary.report.sections.len(), 1);
    let section = &summary.report.sections[0];
    assert_eq!(section.category, "tech_news");
    assert_eq!(section.items.len(), 1);
    let entry = &section.items[0];
    assert_eq!(entry.item.title, "New AI model tops benchmarks");
    assert_eq!(entry.item.body, "The lab released a new model.");
    assert_eq!(entry.item.keywords_matched, vec!["AI"]);
    assert_eq!(entry.summary, "A new model leads the benchmarks.");
    assert_eq!(entry.sentiment, Sentiment::Positive);
    assert!(!entry.degraded);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.degraded, 0);

    let path = match &summary.outcome {
        PublishOutcome::File(path) => path.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    let written = std::fs::read_to_string(path).expect("read report");
    assert!(written.contains("## Tech News"));
    assert!(written.contains("### [New AI model tops benchmarks](https://wire.example/ai-model)"));
    assert!(written.contains("> A new model leads the benchmarks."));
    assert!(!written.contains("bakery"));
}

#[tokio::test]
async fn failing_source_is_noted_and_others_survive() {
    let (mut server, _feed) = feed_server().await;
    let _down = server
        .mock("GET", "/down.xml")
        .with_status(503)
        .create_async()
        .await;
    let dir = tempfile::tempdir().expect("tempdir");

    let pipeline = Pipeline::new(
        config(vec![
            feed("Down Feed", format!("{}/down.xml", server.url())),
            feed("Tech Wire", format!("{}/feed.xml", server.url())),
        ]),
        vec!["AI".to_string()],
        Box::new(MarkdownFileSink::new(dir.path())),
    )
    .expect("pipeline");

    let summary = pipeline.run().await.expect("run");

    assert_eq!(summary.report.item_count(), 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].stage, "fetch_rss");
    assert_eq!(summary.skipped[0].source, "Down Feed");
    assert!(summary.skipped[0].reason.contains("503"));

    let body = summary.report.render_body();
    assert!(body.contains("## Processing Notes"));
    assert!(body.contains("fetch_rss: skipped Down Feed"));
}

#[tokio::test]
async fn malformed_model_reply_degrades_item() {
    let (server, _feed) = feed_server().await;
    let dir = tempfile::tempdir().expect("tempdir");

    let pipeline = Pipeline::new(
        config(vec![feed("Tech Wire", format!("{}/feed.xml", server.url()))]),
        vec!["AI".to_string()],
        Box::new(MarkdownFileSink::new(dir.path())),
    )
    .expect("pipeline")
    .with_summarizer(summarizer("Sorry, I can't produce JSON today."));

    let summary = pipeline.run().await.expect("run");

    assert_eq!(summary.degraded, 1);
    let entry = summary.report.items().next().expect("one item");
    assert!(entry.degraded);
    assert_eq!(entry.sentiment, Sentiment::Neutral);
    assert_eq!(entry.summary, "The lab released a new model.");
    assert!(summary
        .report
        .render_body()
        .contains("summarize: used excerpt for \"New AI model tops benchmarks\""));
}

#[tokio::test]
async fn no_sources_still_renders_configured_sections() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = Config {
        keywords: vec!["AI".to_string()],
        output: OutputConfig {
            category_order: vec!["tech_news".to_string(), "research".to_string()],
            ..OutputConfig::default()
        },
        ..Config::default()
    };

    let pipeline = Pipeline::new(cfg, vec!["AI".to_string()], Box::new(MarkdownFileSink::new(dir.path())))
        .expect("pipeline")
        .with_summarizer(summarizer("unused"));

    let summary = pipeline.run().await.expect("run");

    assert_eq!(summary.report.item_count(), 0);
    let names: Vec<&str> = summary.report.sections.iter().map(|s| s.category.as_str()).collect();
    assert_eq!(names, vec!["tech_news", "research"]);
    let body = summary.report.render_body();
    assert!(body.contains("## Tech News\n\n_No matching items._"));
    assert!(body.contains("## Research\n\n_No matching items._"));
    assert!(body.contains("- **Total items:** 0"));
}

#[tokio::test]
async fn identical_inputs_render_identical_bodies() {
    let (server, _feed) = feed_server().await;
    let dir = tempfile::tempdir().expect("tempdir");

    let pipeline = Pipeline::new(
        config(vec![feed("Tech Wire", format!("{}/feed.xml", server.url()))]),
        vec!["AI".to_string()],
        Box::new(MarkdownFileSink::new(dir.path())),
    )
    .expect("pipeline")
    .with_summarizer(summarizer(r#"{"summary": "Same every time.", "sentiment": "neutral"}"#));

    let first = pipeline.run().await.expect("first run");
    let second = pipeline.run().await.expect("second run");
    assert_eq!(first.report.render_body(), second.report.render_body());
}

#[tokio::test]
async fn duplicate_urls_across_feeds_appear_once() {
    let (server, _feed) = feed_server().await;
    let dir = tempfile::tempdir().expect("tempdir");

    let pipeline = Pipeline::new(
        config(vec![
            feed("Tech Wire", format!("{}/feed.xml", server.url())),
            feed("Tech Wire Mirror", format!("{}/feed.xml", server.url())),
        ]),
        vec!["AI".to_string()],
        Box::new(MarkdownFileSink::new(dir.path())),
    )
    .expect("pipeline");

    let summary = pipeline.run().await.expect("run");

    assert_eq!(summary.report.item_count(), 1);
    let entry = summary.report.items().next().expect("one item");
    assert_eq!(entry.item.source_name, "Tech Wire");
}

#[tokio::test]
async fn history_skips_previously_reported_urls() {
    let (server, _feed) = feed_server().await;
    let dir = tempfile::tempdir().expect("tempdir");

    let pipeline = Pipeline::new(
        config(vec![feed("Tech Wire", format!("{}/feed.xml", server.url()))]),
        vec!["AI".to_string()],
        Box::new(MarkdownFileSink::new(dir.path())),
    )
    .expect("pipeline")
    .with_history(Box::new(LocalHistory::new(dir.path(), 7)));

    let first = pipeline.run().await.expect("first run");
    assert_eq!(first.report.item_count(), 1);
    assert!(dir.path().join("processed_urls.json").exists());

    let second = pipeline.run().await.expect("second run");
    assert_eq!(second.report.item_count(), 0);
}

#[tokio::test]
async fn keyword_match_ignores_case_and_keeps_feed_order() {
    let (server, _feed) = feed_server().await;
    let dir = tempfile::tempdir().expect("tempdir");

    let pipeline = Pipeline::new(
        config(vec![feed("Tech Wire", format!("{}/feed.xml", server.url()))]),
        vec!["model".to_string(), "BREAD".to_string()],
        Box::new(MarkdownFileSink::new(dir.path())),
    )
    .expect("pipeline");

    let summary = pipeline.run().await.expect("run");

    let titles: Vec<&str> = summary.report.items().map(|i| i.item.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["New AI model tops benchmarks", "Local bakery opens second shop"]
    );
    let second = summary.report.items().nth(1).expect("bakery");
    assert_eq!(second.item.keywords_matched, vec!["BREAD"]);
    // no summarizer: excerpt pass-through
    assert!(second.degraded);
    assert_eq!(second.summary, "Bread and pastries.");
}

#[tokio::test]
async fn sink_failure_fails_the_run_and_records_nothing() {
    let (server, _feed) = feed_server().await;
    let dir = tempfile::tempdir().expect("tempdir");

    let pipeline = Pipeline::new(
        config(vec![feed("Tech Wire", format!("{}/feed.xml", server.url()))]),
        vec!["AI".to_string()],
        Box::new(UnreachableSink),
    )
    .expect("pipeline")
    .with_history(Box::new(LocalHistory::new(dir.path(), 7)));

    let err = pipeline.run().await.err().expect("sink failure is fatal");
    let message = format!("{:#}", err);
    assert!(message.contains("unreachable sink failed"));
    assert!(message.contains("connection refused"));
    assert!(!dir.path().join("processed_urls.json").exists());
}

#[tokio::test]
async fn markdown_sink_writes_html_copy() {
    let (server, _feed) = feed_server().await;
    let dir = tempfile::tempdir().expect("tempdir");

    let pipeline = Pipeline::new(
        config(vec![feed("Tech Wire", format!("{}/feed.xml", server.url()))]),
        vec!["AI".to_string()],
        Box::new(MarkdownFileSink::new(dir.path())),
    )
    .expect("pipeline");

    let summary = pipeline.run().await.expect("run");
    let path = match &summary.outcome {
        PublishOutcome::File(path) => path.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    assert!(path.is_file());
    let html = std::fs::read_to_string(path.with_extension("html")).expect("html copy");
    assert!(html.contains("New AI model tops benchmarks</a>"));
    assert!(summary.report.render_body().contains("- **RSS:** 1 items"));
}
