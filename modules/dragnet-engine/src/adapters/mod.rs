//! Source adapters: one fetch-and-extract unit per work item.
//!
//! An adapter produces a `FetchResult` or a typed `FetchError` — it never
//! mutates job or scheduler state. The scheduler depends only on the
//! `SourceAdapter` trait, never on concrete adapter types.

pub mod government;
pub mod paper;
pub mod web;

use async_trait::async_trait;

use dragnet_common::{FetchError, FetchResult, SourceType, WorkItem};

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Host/service this adapter contacts. Combined with the source type
    /// into the rate-limiter admission key.
    fn target(&self) -> &str;

    fn name(&self) -> &str {
        self.target()
    }

    async fn fetch(&self, item: &WorkItem) -> Result<FetchResult, FetchError>;
}

/// Map an HTTP status to the failure taxonomy shared by all adapters.
/// 403/401 read as bot walls on scraping targets; 429 is pressure that a
/// later attempt may relieve; 5xx is the target's problem, not ours.
pub fn classify_status(status: reqwest::StatusCode) -> Option<FetchError> {
    match status.as_u16() {
        200..=299 => None,
        401 | 403 => Some(FetchError::Blocked(format!("HTTP {status}"))),
        404 | 410 => Some(FetchError::NotFound(format!("HTTP {status}"))),
        429 => Some(FetchError::Transient(format!("HTTP {status}"))),
        500..=599 => Some(FetchError::Transient(format!("HTTP {status}"))),
        _ => Some(FetchError::InvalidContent(format!(
            "unexpected HTTP {status}"
        ))),
    }
}
