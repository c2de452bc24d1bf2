use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::feishu::FeishuClient;

pub const HISTORY_FILE: &str = "processed_urls.json";

/// URLs already reported by previous runs.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load(&self) -> Result<HashSet<String>>;
    async fn record(&self, urls: &[String]) -> Result<()>;
}

/// No cross-run memory
pub struct NoHistory;

#[async_trait::async_trait]
impl HistoryStore for NoHistory {
    async fn load(&self) -> Result<HashSet<String>> {
        Ok(HashSet::new())
    }

    async fn record(&self, _urls: &[String]) -> Result<()> {
        Ok(())
    }
}

/// `processed_urls.json` (url -> unix seconds) in the output directory,
/// remembering each URL for `retention_days`.
pub struct LocalHistory {
    path: PathBuf,
    retention_secs: i64,
}

impl LocalHistory {
    pub fn new(output_dir: impl AsRef<Path>, retention_days: u64) -> Self {
        Self {
            path: output_dir.as_ref().join(HISTORY_FILE),
            retention_secs: (retention_days as i64).saturating_mul(24 * 60 * 60),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> BTreeMap<String, i64> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(_) => return BTreeMap::new(),
        };
        match serde_json::from_str(&data) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "history file unreadable, starting fresh");
                BTreeMap::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl HistoryStore for LocalHistory {
    async fn load(&self) -> Result<HashSet<String>> {
        let cutoff = Utc::now().timestamp() - self.retention_secs;
        Ok(self
            .read_entries()
            .await
            .into_iter()
            .filter(|(_, seen_at)| *seen_at > cutoff)
            .map(|(url, _)| url)
            .collect())
    }

    async fn record(&self, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let cutoff = now - self.retention_secs;

        let mut entries = self.read_entries().await;
        for url in urls {
            entries.insert(url.clone(), now);
        }
        entries.retain(|_, seen_at| *seen_at > cutoff);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create history directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&entries).context("Failed to serialize history")?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write history file: {}", self.path.display()))?;
        info!(path = %self.path.display(), recorded = urls.len(), total = entries.len(), "history updated");
        Ok(())
    }
}

/// The external table is the source of truth in feishu-only mode; exporting
/// a row is what records it.
pub struct FeishuHistory {
    client: FeishuClient,
}

impl FeishuHistory {
    pub fn new(client: FeishuClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl HistoryStore for FeishuHistory {
    async fn load(&self) -> Result<HashSet<String>> {
        self.client.existing_urls().await
    }

    async fn record(&self, _urls: &[String]) -> Result<()> {
        Ok(())
    }
}
