//! Government document portal adapter. Queries a repository API and
//! extracts document metadata plus the binary content location.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use dragnet_common::{ArtifactMetadata, FetchError, FetchResult, SourceType, WorkItem};

use super::{classify_status, SourceAdapter};

pub struct GovernmentAdapter {
    base_url: String,
    host: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct DocumentResponse {
    #[serde(default)]
    documents: Vec<DocumentRecord>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentRecord {
    #[serde(default)]
    title: String,
    #[serde(default)]
    agency: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    document_number: String,
    /// Location of the binary (usually PDF) content.
    #[serde(default)]
    pdf_url: String,
}

impl GovernmentAdapter {
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
impl SourceAdapter for GovernmentAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Government
    }

    fn target(&self) -> &str {
        &self.host
    }

    async fn fetch(&self, item: &WorkItem) -> Result<FetchResult, FetchError> {
        info!(
            keyword = item.keyword.as_str(),
            host = self.host.as_str(),
            "Government portal query"
        );

        let mut req = self
            .client
            .get(format!("{}/documents/search", self.base_url))
            .query(&[("q", item.keyword.as_str()), ("per_page", "10")]);
        if !self.api_key.is_empty() {
            req = req.query(&[("api_key", self.api_key.as_str())]);
        }

        let resp = req.send().await.map_err(FetchError::from)?;
        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }

        let source_url = resp.url().to_string();
        let body = resp.text().await.map_err(FetchError::from)?;
        let parsed: DocumentResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::InvalidContent(format!("document payload: {e}")))?;

        if parsed.documents.is_empty() {
            return Err(FetchError::NotFound(format!(
                "no documents match '{}'",
                item.keyword
            )));
        }

        let (content, metadata) = normalize_documents(&parsed.documents);
        let mut result = FetchResult::from_item(item, content, source_url);
        result.metadata = metadata;
        result.metadata.fetched_at = Some(Utc::now());
        Ok(result)
    }
}

/// Flatten a document batch into one content document; headline metadata
/// comes from the top document, including its binary location.
pub fn normalize_documents(documents: &[DocumentRecord]) -> (String, ArtifactMetadata) {
    let content = documents
        .iter()
        .map(|d| {
            format!(
                "{}\n{}\n{}\n{}",
                d.title, d.agency, d.summary, d.document_number
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n");

    let top = &documents[0];
    let metadata = ArtifactMetadata {
        title: Some(top.title.clone()),
        authors: if top.agency.is_empty() {
            Vec::new()
        } else {
            vec![top.agency.clone()]
        },
        summary: if top.summary.is_empty() {
            None
        } else {
            Some(top.summary.clone())
        },
        document_url: if top.pdf_url.is_empty() {
            None
        } else {
            Some(top.pdf_url.clone())
        },
        fetched_at: None,
    };

    (content, metadata)
}
