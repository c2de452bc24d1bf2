/*
newsagent - main.rs
Daily keyword news digest: runs the fetch -> summarize -> report pipeline once,
or every day at a fixed local time.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::{Config, LlmConfig, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use newsagent::feishu::{FeishuClient, FeishuSink};
use newsagent::history::{FeishuHistory, HistoryStore, LocalHistory};
use newsagent::llm::remote::RemoteLlmProvider;
use newsagent::llm::summarizer::Summarizer;
use newsagent::llm::LlmProvider;
use newsagent::pipeline::{workflow_diagram, Pipeline, RunSummary};
use newsagent::scheduler::{parse_schedule, run_daily};
use newsagent::scraping::FirecrawlClient;
use newsagent::sink::{MarkdownFileSink, ReportSink};
use newsagent::social::TavilyClient;

#[derive(Parser, Debug)]
#[command(name = "newsagent", about = "Keyword news digest from RSS, web pages and social media")]
struct Args {
    /// Run the pipeline once and exit
    #[arg(long)]
    once: bool,

    /// Keywords to track (space or comma separated), replaces the configured list
    #[arg(long, num_args = 1.., value_name = "KEYWORD")]
    keywords: Vec<String>,

    /// Daily run time (local, 24h)
    #[arg(long, default_value = "08:00", value_name = "HH:MM")]
    schedule: String,

    /// Print the pipeline graph as Mermaid and exit
    #[arg(long)]
    show_workflow: bool,

    /// Export to the Feishu table instead of writing a markdown file
    #[arg(long)]
    feishu_only: bool,

    /// Path to sources.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output directory for reports and history
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Skip the model and use excerpts as summaries
    #[arg(long)]
    no_summarize: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // .env is optional
    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    if args.show_workflow {
        println!("{}", workflow_diagram());
        return Ok(());
    }

    let schedule = parse_schedule(&args.schedule)?;
    let settings = Settings::from_env();

    let config_path = args.config.clone().unwrap_or_else(|| settings.config_path.clone());
    let mut config = match load_config(&config_path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %format!("{:#}", e), path = %config_path.display(), "failed to load configuration");
            return Err(e);
        }
    };
    info!(path = %config_path.display(), "configuration loaded");

    if let Some(dir) = args
        .output
        .as_ref()
        .map(|p| p.to_string_lossy().to_string())
        .or_else(|| settings.output_dir.clone())
    {
        config.output.dir = dir;
    }

    let keywords = if args.keywords.is_empty() {
        config.keywords.clone()
    } else {
        split_keywords(&args.keywords)
    };
    if keywords.is_empty() {
        warn!("no keywords configured, every item will be filtered out");
    }

    let pipeline = build_pipeline(&config, keywords, &settings, &args)?;
    info!(
        keywords = ?pipeline.keywords(),
        rss_feeds = config.rss_feeds.len(),
        web_pages = config.web_pages.len(),
        summarize = !args.no_summarize,
        "pipeline ready"
    );

    if args.once {
        let summary = pipeline.run().await?;
        log_summary(&summary);
        return Ok(());
    }

    info!(schedule = %args.schedule, "starting daily schedule");
    let pipeline = &pipeline;
    run_daily(schedule, move || async move {
        let summary = pipeline.run().await?;
        log_summary(&summary);
        Ok::<(), anyhow::Error>(())
    })
    .await
}

/// `config.default.toml` next to the sources file is merged underneath it.
async fn load_config(path: &Path) -> Result<Config> {
    let default_path = path.with_file_name("config.default.toml");
    let default_path = if default_path.exists() && default_path != path {
        Some(default_path)
    } else {
        None
    };
    Config::load_with_defaults(default_path.as_deref(), Some(path)).await
}

fn split_keywords(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|arg| arg.split(|c: char| c == ',' || c.is_whitespace()))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Wire the stage clients. A credential is only demanded when its stage has work.
fn build_pipeline(config: &Config, keywords: Vec<String>, settings: &Settings, args: &Args) -> Result<Pipeline> {
    let output_dir = PathBuf::from(&config.output.dir);

    let (sink, history): (Box<dyn ReportSink>, Box<dyn HistoryStore>) = if args.feishu_only {
        let credentials = settings.feishu.clone().context(
            "FEISHU_APP_ID, FEISHU_APP_SECRET, FEISHU_BASE_APP_TOKEN and FEISHU_BASE_TABLE_ID are required for --feishu-only",
        )?;
        let client = FeishuClient::new(credentials)?;
        (
            Box::new(FeishuSink::new(client.clone())),
            Box::new(FeishuHistory::new(client)),
        )
    } else {
        (
            Box::new(MarkdownFileSink::new(&output_dir)),
            Box::new(LocalHistory::new(&output_dir, config.output.history_days)),
        )
    };

    let mut pipeline = Pipeline::new(config.clone(), keywords, sink)?.with_history(history);

    if !config.web_pages.is_empty() {
        let key = settings.require(Settings::FIRECRAWL_API_KEY, "web page scraping")?;
        pipeline = pipeline.with_web(FirecrawlClient::new(key)?);
    }

    if config.social_enabled(pipeline.keywords()) {
        let key = settings.require(Settings::TAVILY_API_KEY, "social media search")?;
        pipeline = pipeline.with_social(TavilyClient::new(key, &config.social_media)?);
    }

    if !args.no_summarize {
        let provider = create_llm_provider(&config.llm, settings)?;
        pipeline = pipeline.with_summarizer(Summarizer::new(provider, config.output.summary_max_words));
    }

    Ok(pipeline)
}

fn create_llm_provider(llm_config: &LlmConfig, settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
    let api_key = settings
        .require(llm_config.api_key_env(), "summarization")
        .context("set the key or run with --no-summarize")?;

    let provider = RemoteLlmProvider::new(llm_config.api_url(), api_key, llm_config.model()).with_defaults(
        llm_config.timeout_seconds.unwrap_or(60),
        llm_config.max_tokens.unwrap_or(512),
        llm_config.temperature.unwrap_or(0.3),
    )
    .with_json_mode(true);
    info!(model = provider.model(), "LLM provider initialized");
    Ok(Arc::new(provider))
}

fn log_summary(summary: &RunSummary) {
    let counts = summary.report.counts();
    info!(
        items = counts.total,
        positive = counts.positive,
        negative = counts.negative,
        neutral = counts.neutral,
        skipped_sources = summary.skipped.len(),
        degraded = summary.degraded,
        "run complete: {}",
        summary.outcome
    );
}
