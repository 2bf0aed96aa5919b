//! Collaborator contracts the core depends on but does not implement:
//! keyword expansion, artifact storage, progress notification, and durable
//! job persistence. In-memory and no-op implementations back tests and the
//! default runner wiring.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use dragnet_common::{ArtifactMetadata, FetchResult, JobEvent, JobSnapshot, JobStatus};

/// Keyword expansion is a black box (an LLM call in production). On
/// `Unavailable` the job falls back to the original keyword set rather
/// than blocking.
#[derive(Debug, thiserror::Error)]
#[error("expansion unavailable: {0}")]
pub struct Unavailable(pub String);

#[async_trait]
pub trait KeywordExpander: Send + Sync {
    async fn expand(&self, keywords: &[String]) -> Result<Vec<String>, Unavailable>;
}

/// Pass-through expander for environments without an expansion service.
pub struct NoopExpander;

#[async_trait]
impl KeywordExpander for NoopExpander {
    async fn expand(&self, _keywords: &[String]) -> Result<Vec<String>, Unavailable> {
        Ok(Vec::new())
    }
}

/// Durable artifact storage. Idempotency lives in the dedup index, not
/// here: `store` is called at most once per distinct content hash, `link`
/// for every duplicate encounter afterwards.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, artifact_id: Uuid, result: &FetchResult) -> Result<()>;
    /// Associate an additional (job, keyword, source_url) with an existing
    /// artifact.
    async fn link(&self, artifact_id: Uuid, result: &FetchResult) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content: String,
    pub content_hash: String,
    pub metadata: ArtifactMetadata,
    /// Every (job_id, keyword, source_url) that produced this content.
    pub sources: Vec<(Uuid, String, String)>,
}

/// In-memory store used by tests and the default runner wiring.
#[derive(Default)]
pub struct InMemoryStore {
    artifacts: Mutex<HashMap<Uuid, StoredArtifact>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.lock().expect("store lock poisoned").len()
    }

    pub fn get(&self, artifact_id: Uuid) -> Option<StoredArtifact> {
        self.artifacts
            .lock()
            .expect("store lock poisoned")
            .get(&artifact_id)
            .cloned()
    }

    /// Every (job_id, keyword, source_url) across all stored artifacts.
    pub fn all_sources(&self) -> Vec<(Uuid, String, String)> {
        self.artifacts
            .lock()
            .expect("store lock poisoned")
            .values()
            .flat_map(|a| a.sources.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn store(&self, artifact_id: Uuid, result: &FetchResult) -> Result<()> {
        let mut artifacts = self.artifacts.lock().expect("store lock poisoned");
        artifacts.insert(
            artifact_id,
            StoredArtifact {
                content: result.raw_content.clone(),
                content_hash: result.content_hash.clone(),
                metadata: result.metadata.clone(),
                sources: vec![(
                    result.job_id,
                    result.keyword.clone(),
                    result.source_url.clone(),
                )],
            },
        );
        Ok(())
    }

    async fn link(&self, artifact_id: Uuid, result: &FetchResult) -> Result<()> {
        let mut artifacts = self.artifacts.lock().expect("store lock poisoned");
        let artifact = artifacts
            .get_mut(&artifact_id)
            .ok_or_else(|| anyhow::anyhow!("link to unknown artifact {artifact_id}"))?;
        artifact.sources.push((
            result.job_id,
            result.keyword.clone(),
            result.source_url.clone(),
        ));
        Ok(())
    }
}

/// Best-effort notification sink for `(job_id, status, progress)` events.
/// Synchronous and infallible by contract: implementations log-and-drop on
/// delivery problems rather than blocking the core.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: &JobEvent);
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn publish(&self, _event: &JobEvent) {}
}

/// Sink that surfaces transitions as structured log lines.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn publish(&self, event: &JobEvent) {
        info!(
            job_id = %event.job_id,
            status = %event.status,
            progress = event.progress,
            "Job progress"
        );
    }
}

/// Sink that records events for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().expect("sink lock poisoned").clone()
    }
}

impl ProgressSink for RecordingSink {
    fn publish(&self, event: &JobEvent) {
        self.events
            .lock()
            .expect("sink lock poisoned")
            .push(event.clone());
    }
}

/// Durable persistence for job state. The engine saves snapshots on
/// terminal transitions; query access belongs to the API layer.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save(&self, snapshot: &JobSnapshot) -> Result<()>;
    async fn load(&self, id: Uuid) -> Result<Option<JobSnapshot>>;
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobSnapshot>>;
}

#[derive(Default)]
pub struct InMemoryRepository {
    jobs: Mutex<HashMap<Uuid, JobSnapshot>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryRepository {
    async fn save(&self, snapshot: &JobSnapshot) -> Result<()> {
        self.jobs
            .lock()
            .expect("repository lock poisoned")
            .insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<JobSnapshot>> {
        Ok(self
            .jobs
            .lock()
            .expect("repository lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobSnapshot>> {
        Ok(self
            .jobs
            .lock()
            .expect("repository lock poisoned")
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }
}
