use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::report::Report;

/// Where a finished report went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    File(PathBuf),
    Table { created: usize, skipped_existing: usize },
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::File(path) => write!(f, "report saved to {}", path.display()),
            PublishOutcome::Table {
                created,
                skipped_existing,
            } => write!(
                f,
                "{} records exported ({} already present)",
                created, skipped_existing
            ),
        }
    }
}

#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn publish(&self, report: &Report) -> Result<PublishOutcome>;
}

/// Writes `news_report_<timestamp>.md` into a directory, creating it if needed,
/// plus an `.html` copy next to it. Only the markdown write can fail the run.
pub struct MarkdownFileSink {
    dir: PathBuf,
}

impl MarkdownFileSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl ReportSink for MarkdownFileSink {
    fn name(&self) -> &'static str {
        "markdown"
    }

    async fn publish(&self, report: &Report) -> Result<PublishOutcome> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", self.dir.display()))?;
        let path = self.dir.join(report.filename());
        tokio::fs::write(&path, report.render())
            .await
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        info!(path = %path.display(), items = report.item_count(), "report written");

        let html_path = path.with_extension("html");
        match tokio::fs::write(&html_path, report.render_html()).await {
            Ok(()) => info!(path = %html_path.display(), "html report written"),
            Err(e) => warn!(path = %html_path.display(), error = %e, "html report not written"),
        }
        Ok(PublishOutcome::File(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_report_into_new_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("reports/daily");
        let report = Report::build(Vec::new(), &["general".to_string()], Vec::new(), Vec::new(), true);

        let outcome = MarkdownFileSink::new(&out).publish(&report).await.expect("publish");
        let path = match outcome {
            PublishOutcome::File(path) => path,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(path, out.join(report.filename()));
        let written = std::fs::read_to_string(&path).expect("read report");
        assert!(written.contains("## General\n\n_No matching items._"));

        let html = std::fs::read_to_string(path.with_extension("html")).expect("read html copy");
        assert!(html.contains("<h2>General</h2>"));
    }

    #[tokio::test]
    async fn html_copy_failure_keeps_markdown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = Report::build(Vec::new(), &["general".to_string()], Vec::new(), Vec::new(), true);
        let html_name = report.filename().replace(".md", ".html");
        // a directory where the html file should go makes that write fail
        std::fs::create_dir(dir.path().join(&html_name)).expect("block html path");

        let outcome = MarkdownFileSink::new(dir.path()).publish(&report).await.expect("publish");
        assert_eq!(outcome, PublishOutcome::File(dir.path().join(report.filename())));
        assert!(dir.path().join(report.filename()).is_file());
    }
}
