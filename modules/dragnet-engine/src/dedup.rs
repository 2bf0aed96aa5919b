//! Content-hash dedup index: at most one stored artifact per distinct hash
//! across the whole system, regardless of which job or keyword produced it.
//!
//! Hashing runs over normalized content so near-identical re-fetches of the
//! same page collapse to one record. Each hash owns a once-cell: the first
//! resolver runs the store inside the cell's initializer and concurrent
//! resolvers for the same hash wait for that store to finish, so a
//! duplicate can never link to an artifact that has not landed yet. The
//! map is sharded by hash prefix so unrelated content never contends on
//! one lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

const SHARD_COUNT: usize = 16;

/// Result of resolving a content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOutcome {
    /// True when this hash was seen for the first time and the caller's
    /// store ran.
    pub created: bool,
    /// The canonical artifact for this hash: the caller's candidate when
    /// created, the first resolver's id otherwise.
    pub artifact_id: Uuid,
}

pub struct DedupIndex {
    shards: Vec<Mutex<HashMap<String, Arc<OnceCell<Uuid>>>>>,
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupIndex {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Resolve the canonical artifact for `content_hash`, running `store_fn`
    /// when the hash is new. The store runs exactly once per hash
    /// system-wide; every concurrent resolver waits for it to complete and
    /// then gets the winner's artifact id back, so it can link an additional
    /// source/keyword association instead of storing a duplicate object. A
    /// failed store leaves the hash unclaimed for the next resolver.
    pub async fn resolve<F, Fut>(
        &self,
        content_hash: &str,
        candidate: Uuid,
        store_fn: F,
    ) -> Result<RegisterOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let cell = self.cell_for(content_hash);
        let mut created = false;
        let artifact_id = *cell
            .get_or_try_init(|| async {
                store_fn().await?;
                created = true;
                Ok::<_, anyhow::Error>(candidate)
            })
            .await?;
        if !created {
            debug!(content_hash, artifact_id = %artifact_id, "Duplicate content hash");
        }
        Ok(RegisterOutcome {
            created,
            artifact_id,
        })
    }

    /// Look up the artifact for a fully stored hash.
    pub fn lookup(&self, content_hash: &str) -> Option<Uuid> {
        let shard = &self.shards[self.shard_for(content_hash)];
        shard
            .lock()
            .expect("dedup shard lock poisoned")
            .get(content_hash)
            .and_then(|cell| cell.get().copied())
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                s.lock()
                    .expect("dedup shard lock poisoned")
                    .values()
                    .filter(|cell| cell.initialized())
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell_for(&self, content_hash: &str) -> Arc<OnceCell<Uuid>> {
        let shard = &self.shards[self.shard_for(content_hash)];
        shard
            .lock()
            .expect("dedup shard lock poisoned")
            .entry(content_hash.to_string())
            .or_default()
            .clone()
    }

    fn shard_for(&self, content_hash: &str) -> usize {
        // Hex hash input: first byte spreads uniformly across shards.
        content_hash.bytes().next().unwrap_or(0) as usize % SHARD_COUNT
    }
}

/// Collapse whitespace runs and trim so cosmetic re-renders of the same
/// page hash identically.
pub fn normalize_content(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 hex over normalized content bytes.
pub fn content_hash(raw: &str) -> String {
    let normalized = normalize_content(raw);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
