//! Web search adapter with human-pacing and identity rotation.
//!
//! Search engines are the hostile end of the source spectrum: they rate
//! limit aggressively, serve CAPTCHAs to suspected bots, and redirect
//! requests from filtered regions off-domain. Pacing behavior is a policy
//! object injected at construction so it can be swapped or disabled per
//! environment.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use dragnet_common::{Config, FetchError, FetchResult, SourceType, WorkItem};

use super::{classify_status, SourceAdapter};

/// Browser identity presented to a search engine.
#[derive(Debug, Clone)]
pub struct IdentityProfile {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
    pub viewport: (u32, u32),
}

const PROFILES: &[IdentityProfile] = &[
    IdentityProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
        viewport: (1920, 1080),
    },
    IdentityProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                     (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        accept_language: "en-US,en;q=0.8",
        viewport: (1440, 900),
    },
    IdentityProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:126.0) Gecko/20100101 Firefox/126.0",
        accept_language: "en-GB,en;q=0.7",
        viewport: (1600, 900),
    },
];

/// Anti-detection behavior injected into `WebSearchAdapter`.
#[async_trait]
pub trait PacingPolicy: Send + Sync {
    /// Wait before the next request, imitating human browsing cadence.
    async fn pause(&self);
    /// Identity to present on the next request.
    fn next_identity(&self) -> IdentityProfile;
}

/// Random delay within a configured range plus round-robin identity
/// rotation.
pub struct HumanPacing {
    min_delay: Duration,
    max_delay: Duration,
    cursor: AtomicUsize,
}

impl HumanPacing {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pacing_min_delay, config.pacing_max_delay)
    }
}

#[async_trait]
impl PacingPolicy for HumanPacing {
    async fn pause(&self) {
        let spread = (self.max_delay - self.min_delay).as_millis() as u64;
        let jitter = if spread > 0 {
            rand::rng().random_range(0..spread)
        } else {
            0
        };
        tokio::time::sleep(self.min_delay + Duration::from_millis(jitter)).await;
    }

    fn next_identity(&self) -> IdentityProfile {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        PROFILES[i % PROFILES.len()].clone()
    }
}

/// No delays, fixed identity. For tests and trusted environments.
pub struct NoPacing;

#[async_trait]
impl PacingPolicy for NoPacing {
    async fn pause(&self) {}

    fn next_identity(&self) -> IdentityProfile {
        PROFILES[0].clone()
    }
}

/// One configured search engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub name: String,
    pub host: String,
    /// Search URL template with a `{query}` placeholder.
    pub search_url: String,
}

impl EngineConfig {
    pub fn url_for(&self, keyword: &str) -> String {
        self.search_url
            .replace("{query}", &urlencode(keyword))
    }
}

pub struct WebSearchAdapter {
    engine: EngineConfig,
    client: reqwest::Client,
    pacing: Box<dyn PacingPolicy>,
}

impl WebSearchAdapter {
    pub fn new(engine: EngineConfig, pacing: Box<dyn PacingPolicy>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            engine,
            client,
            pacing,
        }
    }
}

#[async_trait]
impl SourceAdapter for WebSearchAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::WebSearch
    }

    fn target(&self) -> &str {
        &self.engine.host
    }

    fn name(&self) -> &str {
        &self.engine.name
    }

    async fn fetch(&self, item: &WorkItem) -> Result<FetchResult, FetchError> {
        self.pacing.pause().await;
        let identity = self.pacing.next_identity();
        let url = self.engine.url_for(&item.keyword);

        info!(
            engine = self.engine.name.as_str(),
            keyword = item.keyword.as_str(),
            "Web search fetch"
        );

        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, identity.user_agent)
            .header(reqwest::header::ACCEPT_LANGUAGE, identity.accept_language)
            .send()
            .await
            .map_err(FetchError::from)?;

        // Regional filtering shows up as a redirect to an unrelated domain
        // rather than an error status. Report it as Blocked so the retry
        // policy does not hammer a target that will never answer.
        let final_url = resp.url().clone();
        if is_off_domain(&self.engine.host, &final_url) {
            warn!(
                engine = self.engine.name.as_str(),
                final_url = %final_url,
                "Off-domain redirect, treating as regional block"
            );
            return Err(FetchError::Blocked(format!(
                "redirected off-domain to {final_url}"
            )));
        }

        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }

        let body = resp.text().await.map_err(FetchError::from)?;

        if let Some(marker) = detect_block_markers(&body) {
            return Err(FetchError::Blocked(format!("bot wall marker: {marker}")));
        }

        if body.trim().len() < 64 {
            return Err(FetchError::InvalidContent("empty or near-empty page".into()));
        }

        let mut result = FetchResult::from_item(item, body, final_url.to_string());
        result.metadata.title = extract_title(&result.raw_content);
        result.metadata.fetched_at = Some(Utc::now());
        Ok(result)
    }
}

/// True when the response landed on a host unrelated to the engine we
/// asked. Subdomain moves (www. ↔ apex, consent. etc.) stay on-domain.
pub fn is_off_domain(expected_host: &str, final_url: &url::Url) -> bool {
    let Some(host) = final_url.host_str() else {
        return true;
    };
    let expected = expected_host.trim_start_matches("www.");
    let actual = host.trim_start_matches("www.");
    actual != expected && !actual.ends_with(&format!(".{expected}"))
}

/// Scan a page body for CAPTCHA / bot-wall markers.
pub fn detect_block_markers(body: &str) -> Option<&'static str> {
    const MARKERS: &[(&str, &str)] = &[
        ("g-recaptcha", "recaptcha"),
        ("cf-challenge", "cloudflare challenge"),
        ("unusual traffic from your computer", "unusual traffic page"),
        ("verify you are a human", "human verification page"),
        ("access denied", "access denied page"),
    ];
    let lower = body.to_lowercase();
    MARKERS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, label)| *label)
}

/// Pull the `<title>` text out of an HTML page, if present.
pub fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = html[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let title = html[open_end..close].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
