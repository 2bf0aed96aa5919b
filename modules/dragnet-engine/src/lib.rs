//! Scraping job orchestration and acquisition-resilience engine.
//!
//! Turns a keyword set into a supervised set of concurrent fetch operations
//! across pluggable source adapters, with per-target rate limiting, retry
//! and backoff for transient failures, content-hash deduplication, and a
//! job state machine that tracks progress and supports cancellation.

pub mod adapters;
pub mod dedup;
pub mod external;
pub mod job;
pub mod rate;
pub mod retry;
pub mod scheduler;

pub use adapters::SourceAdapter;
pub use dedup::{content_hash, normalize_content, DedupIndex, RegisterOutcome};
pub use external::{ArtifactStore, JobRepository, KeywordExpander, ProgressSink};
pub use job::JobTracker;
pub use rate::{Admission, RateConfig, RateLimiter};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::TaskScheduler;
