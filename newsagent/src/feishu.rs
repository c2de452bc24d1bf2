use anyhow::{Context, Result};
use common::FeishuCredentials;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::SummarizedItem;
use crate::report::{category_title, Report};
use crate::sink::{PublishOutcome, ReportSink};

pub const FEISHU_API_URL: &str = "https://open.feishu.cn/open-apis";

/// Bitable page size and batch_create limit
const PAGE_SIZE: usize = 500;
const MAX_SUMMARY_CHARS: usize = 2000;

/// Client for one Feishu Base (Bitable) table.
#[derive(Clone)]
pub struct FeishuClient {
    base_url: String,
    credentials: FeishuCredentials,
    client: Client,
}

impl FeishuClient {
    pub fn new(credentials: FeishuCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: FEISHU_API_URL.to_string(),
            credentials,
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn records_url(&self) -> String {
        format!(
            "{}/bitable/v1/apps/{}/tables/{}/records",
            self.base_url.trim_end_matches('/'),
            self.credentials.app_token,
            self.credentials.table_id
        )
    }

    pub async fn tenant_token(&self) -> Result<String> {
        let endpoint = format!(
            "{}/auth/v3/tenant_access_token/internal/",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&endpoint)
            .json(&json!({
                "app_id": self.credentials.app_id,
                "app_secret": self.credentials.app_secret,
            }))
            .send()
            .await
            .context("Feishu auth request failed")?;

        let body: TokenResponse = read_json(response, "auth").await?;
        if body.code != 0 {
            anyhow::bail!("Feishu auth error {}: {}", body.code, body.msg);
        }
        body.tenant_access_token
            .filter(|t| !t.is_empty())
            .context("Feishu auth response has no tenant_access_token")
    }

    /// All URLs already present in the table.
    pub async fn existing_urls(&self) -> Result<HashSet<String>> {
        let token = self.tenant_token().await?;
        self.list_urls(&token).await
    }

    async fn list_urls(&self, token: &str) -> Result<HashSet<String>> {
        let mut urls = HashSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(self.records_url())
                .bearer_auth(token)
                .query(&[("page_size", PAGE_SIZE.to_string())]);
            if let Some(ref page) = page_token {
                request = request.query(&[("page_token", page)]);
            }
            let response = request.send().await.context("Feishu list records request failed")?;
            let body: ApiResponse<ListData> = read_json(response, "list records").await?;
            if body.code != 0 {
                anyhow::bail!("Feishu list records error {}: {}", body.code, body.msg);
            }

            let data = body.data.unwrap_or_default();
            for record in data.items.unwrap_or_default() {
                if let Some(link) = record.fields.get("URL").and_then(url_field_link) {
                    urls.insert(link);
                }
            }

            match data.page_token.filter(|_| data.has_more) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        info!(existing = urls.len(), "fetched existing table URLs");
        Ok(urls)
    }

    /// Create rows in batches; returns how many the API reports as created.
    async fn batch_create(&self, token: &str, records: Vec<Value>) -> Result<usize> {
        let endpoint = format!("{}/batch_create", self.records_url());
        let mut created = 0;

        for batch in records.chunks(PAGE_SIZE) {
            let response = self
                .client
                .post(&endpoint)
                .bearer_auth(token)
                .json(&json!({ "records": batch }))
                .send()
                .await
                .context("Feishu batch create request failed")?;
            let body: ApiResponse<CreateData> = read_json(response, "batch create").await?;
            if body.code != 0 {
                anyhow::bail!(
                    "Feishu batch create error {}: {} ({} records created before failure)",
                    body.code,
                    body.msg,
                    created
                );
            }
            let count = body.data.map(|d| d.records.len()).unwrap_or(0);
            debug!(batch = batch.len(), created = count, "batch created");
            created += count;
        }

        Ok(created)
    }
}

/// URL cells come back either as `{link, text}` or as plain text.
fn url_field_link(value: &Value) -> Option<String> {
    let link = match value {
        Value::Object(map) => map.get("link").and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }?;
    (!link.is_empty()).then(|| link.to_string())
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Feishu {} HTTP error {}: {}", what, status, body);
    }
    response
        .json()
        .await
        .with_context(|| format!("Failed to parse Feishu {} response", what))
}

/// Table row for one item: Title, Source, Category, Sentiment, Keywords,
/// Summary, URL and Date (milliseconds since epoch).
pub fn record_fields(entry: &SummarizedItem, fallback_ms: i64) -> Value {
    let item = &entry.item;
    let summary: String = entry.summary.chars().take(MAX_SUMMARY_CHARS).collect();
    json!({
        "fields": {
            "Title": item.title,
            "Source": item.source_name,
            "Category": category_title(&item.category),
            "Sentiment": entry.sentiment.display(),
            "Keywords": item.keywords_matched.join(", "),
            "Summary": summary,
            "URL": { "link": item.url, "text": item.title },
            "Date": item.published_at.map(|d| d.timestamp_millis()).unwrap_or(fallback_ms),
        }
    })
}

/// Exports report items as table rows, skipping URLs the table already holds.
pub struct FeishuSink {
    client: FeishuClient,
}

impl FeishuSink {
    pub fn new(client: FeishuClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ReportSink for FeishuSink {
    fn name(&self) -> &'static str {
        "feishu"
    }

    async fn publish(&self, report: &Report) -> Result<PublishOutcome> {
        if report.item_count() == 0 {
            info!("no items to export");
            return Ok(PublishOutcome::Table {
                created: 0,
                skipped_existing: 0,
            });
        }

        let token = self.client.tenant_token().await?;
        let mut seen = self.client.list_urls(&token).await?;
        let fallback_ms = report.generated_at.timestamp_millis();

        let mut records = Vec::new();
        let mut skipped_existing = 0;
        for entry in report.items() {
            if !entry.item.url.is_empty() && !seen.insert(entry.item.url.clone()) {
                skipped_existing += 1;
                continue;
            }
            records.push(record_fields(entry, fallback_ms));
        }

        let created = if records.is_empty() {
            0
        } else {
            self.client.batch_create(&token, records).await?
        };
        info!(created, skipped_existing, "exported report to table");
        Ok(PublishOutcome::Table {
            created,
            skipped_existing,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct ListData {
    items: Option<Vec<RecordItem>>,
    #[serde(default)]
    has_more: bool,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordItem {
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct CreateData {
    #[serde(default)]
    records: Vec<Value>,
}
