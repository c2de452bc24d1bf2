use anyhow::Result;
use tracing::{info, warn};

use crate::filter::KeywordFilter;
use crate::models::{RawItem, SourceSkip};

/// A fetch stage backend: one external call per source definition.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    type Source: Send + Sync;

    /// Stage name used in logs and skip notes
    fn stage(&self) -> &'static str;

    /// Human-readable source label
    fn describe(&self, source: &Self::Source) -> String;

    async fn fetch(&self, source: &Self::Source) -> Result<Vec<RawItem>>;
}

/// Items retained by a stage plus the sources it had to skip
#[derive(Debug, Default)]
pub struct StageOutput {
    pub items: Vec<RawItem>,
    pub skipped: Vec<SourceSkip>,
}

/// Visit every source in order, keep keyword matches, record failures as skips.
pub async fn collect<F>(fetcher: &F, sources: &[F::Source], filter: &KeywordFilter) -> StageOutput
where
    F: Fetcher + ?Sized,
{
    let mut output = StageOutput::default();

    for source in sources {
        let label = fetcher.describe(source);
        match fetcher.fetch(source).await {
            Ok(items) => {
                let fetched = items.len();
                let kept = filter.retain(items);
                info!(
                    stage = fetcher.stage(),
                    source = %label,
                    fetched,
                    kept = kept.len(),
                    "source fetched"
                );
                output.items.extend(kept);
            }
            Err(e) => {
                warn!(stage = fetcher.stage(), source = %label, error = %e, "skipping source");
                output.skipped.push(SourceSkip {
                    stage: fetcher.stage(),
                    source: label,
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    output
}
