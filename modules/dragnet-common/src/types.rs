use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which kind of content source a work item targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Open web search engines. Externally rate-limited and hostile to bots.
    WebSearch,
    /// Academic-paper index APIs.
    Paper,
    /// Government document portals.
    Government,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::WebSearch => write!(f, "web_search"),
            SourceType::Paper => write!(f, "paper"),
            SourceType::Government => write!(f, "government"),
        }
    }
}

impl SourceType {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "web" | "web_search" | "search" => Some(SourceType::WebSearch),
            "paper" | "papers" | "academic" => Some(SourceType::Paper),
            "gov" | "government" => Some(SourceType::Government),
            _ => None,
        }
    }
}

/// Job lifecycle states. Transitions flow pending → running → one of the
/// three terminal states, and are owned exclusively by the job tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Original request keywords plus whatever the expansion collaborator added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordSet {
    pub original: Vec<String>,
    pub expanded: Vec<String>,
}

impl KeywordSet {
    /// All keywords to collect for, deduplicated, original set first.
    pub fn effective(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.original
            .iter()
            .chain(self.expanded.iter())
            .filter(|k| seen.insert(k.to_lowercase()))
            .cloned()
            .collect()
    }
}

/// A collection job as seen by callers: lifecycle state plus item accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub owner: String,
    pub source_types: Vec<SourceType>,
    pub keywords: KeywordSet,
    pub status: JobStatus,
    /// 0–100, floor(completed / total * 100). Never decreases.
    pub progress: u8,
    pub total_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    /// Distinct permanent-failure kinds encountered, for the job detail view.
    pub error_summary: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One (keyword, source, target) fetch unit belonging to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub job_id: Uuid,
    pub keyword: String,
    pub source_type: SourceType,
    /// Host/service the adapter contacts, e.g. one search engine.
    pub adapter_target: String,
    /// Fetch attempts made so far, including the one in flight.
    pub attempt_count: u32,
}

impl WorkItem {
    pub fn new(job_id: Uuid, keyword: &str, source_type: SourceType, target: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            keyword: keyword.to_string(),
            source_type,
            adapter_target: target.to_string(),
            attempt_count: 0,
        }
    }

    /// Rate-limiter admission key for this item's target.
    pub fn target_key(&self) -> String {
        format!("{}:{}", self.source_type, self.adapter_target)
    }
}

/// Metadata extracted by an adapter alongside raw content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub summary: Option<String>,
    /// Location of binary content (PDFs etc.) when the source provides one.
    pub document_url: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Product of one adapter invocation. Transient: consumed by the dedup
/// index immediately, never persisted on its own.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub work_item_id: Uuid,
    pub job_id: Uuid,
    pub keyword: String,
    pub source_type: SourceType,
    pub raw_content: String,
    /// SHA-256 hex over normalized content. Filled in by the engine, not
    /// by adapters.
    pub content_hash: String,
    pub source_url: String,
    pub metadata: ArtifactMetadata,
}

impl FetchResult {
    pub fn from_item(item: &WorkItem, raw_content: String, source_url: String) -> Self {
        Self {
            work_item_id: item.id,
            job_id: item.job_id,
            keyword: item.keyword.clone(),
            source_type: item.source_type,
            raw_content,
            content_hash: String::new(),
            source_url,
            metadata: ArtifactMetadata::default(),
        }
    }
}

/// Status/progress event published on every job transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
}
