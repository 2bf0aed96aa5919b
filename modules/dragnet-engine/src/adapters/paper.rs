//! Academic-paper index adapter. Queries a works API and normalizes result
//! metadata (title, authors, abstract) into the common FetchResult shape.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use dragnet_common::{ArtifactMetadata, FetchError, FetchResult, SourceType, WorkItem};

use super::{classify_status, SourceAdapter};

pub struct PaperAdapter {
    base_url: String,
    host: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PaperResponse {
    #[serde(default)]
    items: Vec<PaperRecord>,
}

#[derive(Debug, Deserialize)]
pub struct PaperRecord {
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    doi: String,
    #[serde(default)]
    url: String,
}

impl PaperAdapter {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let host = url::Url::parse(base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| base_url.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            host,
            api_key: api_key.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

#[async_trait]
impl SourceAdapter for PaperAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Paper
    }

    fn target(&self) -> &str {
        &self.host
    }

    async fn fetch(&self, item: &WorkItem) -> Result<FetchResult, FetchError> {
        info!(keyword = item.keyword.as_str(), host = self.host.as_str(), "Paper index query");

        let mut req = self
            .client
            .get(format!("{}/works", self.base_url))
            .query(&[("query", item.keyword.as_str()), ("rows", "10")]);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await.map_err(FetchError::from)?;
        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }

        let source_url = resp.url().to_string();
        let body = resp.text().await.map_err(FetchError::from)?;
        let parsed: PaperResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::InvalidContent(format!("paper payload: {e}")))?;

        if parsed.items.is_empty() {
            return Err(FetchError::NotFound(format!(
                "no papers match '{}'",
                item.keyword
            )));
        }

        let (content, metadata) = normalize_records(&parsed.items);
        let mut result = FetchResult::from_item(item, content, source_url);
        result.metadata = metadata;
        result.metadata.fetched_at = Some(Utc::now());
        Ok(result)
    }
}

/// Flatten an API result batch into one content document plus headline
/// metadata taken from the top-ranked record.
pub fn normalize_records(records: &[PaperRecord]) -> (String, ArtifactMetadata) {
    let content = records
        .iter()
        .map(|r| {
            format!(
                "{}\n{}\n{}\n{}",
                r.title,
                r.authors.join(", "),
                r.abstract_text,
                if r.doi.is_empty() { &r.url } else { &r.doi }
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n");

    let top = &records[0];
    let metadata = ArtifactMetadata {
        title: Some(top.title.clone()),
        authors: top.authors.clone(),
        summary: if top.abstract_text.is_empty() {
            None
        } else {
            Some(top.abstract_text.clone())
        },
        document_url: if top.url.is_empty() {
            None
        } else {
            Some(top.url.clone())
        },
        fetched_at: None,
    };

    (content, metadata)
}
