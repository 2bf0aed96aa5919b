//! End-to-end scheduler scenarios driven by scripted adapters.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use dragnet_common::{Config, FetchError, FetchResult, JobStatus, SourceType, WorkItem};
use dragnet_engine::adapters::SourceAdapter;
use dragnet_engine::external::{
    ArtifactStore, InMemoryRepository, InMemoryStore, JobRepository, NoopExpander, NoopSink,
};
use dragnet_engine::job::JobTracker;
use dragnet_engine::rate::{RateConfig, RateLimiter};
use dragnet_engine::retry::RetryPolicy;
use dragnet_engine::scheduler::{SchedulerDeps, TaskScheduler};
use dragnet_engine::DedupIndex;

/// What a scripted adapter does on each fetch.
enum Behavior {
    /// Succeed with fixed content, or per-keyword content when None.
    Succeed(Option<String>),
    Blocked,
    /// Fail `Transient` this many times, then succeed.
    TransientTimes(u32),
    /// Sleep before succeeding (cancellation and timeout scenarios).
    Slow(Duration),
}

struct ScriptedAdapter {
    source_type: SourceType,
    target: String,
    behavior: Behavior,
    calls: AtomicU32,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAdapter {
    fn new(target: &str, behavior: Behavior, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            source_type: SourceType::WebSearch,
            target: target.to_string(),
            behavior,
            calls: AtomicU32::new(0),
            log,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    fn target(&self) -> &str {
        &self.target
    }

    async fn fetch(&self, item: &WorkItem) -> Result<FetchResult, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.target, item.keyword));

        match &self.behavior {
            Behavior::Succeed(fixed) => {
                let content = fixed
                    .clone()
                    .unwrap_or_else(|| format!("{} results for {}", self.target, item.keyword));
                Ok(FetchResult::from_item(
                    item,
                    content,
                    format!("https://{}/search?q={}", self.target, item.keyword),
                ))
            }
            Behavior::Blocked => Err(FetchError::Blocked("redirected off-domain".into())),
            Behavior::TransientTimes(n) => {
                if call <= *n {
                    Err(FetchError::Transient(format!("connection reset #{call}")))
                } else {
                    Ok(FetchResult::from_item(
                        item,
                        format!("{} late results for {}", self.target, item.keyword),
                        format!("https://{}/search?q={}", self.target, item.keyword),
                    ))
                }
            }
            Behavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(FetchResult::from_item(
                    item,
                    format!("{} slow results for {}", self.target, item.keyword),
                    format!("https://{}/search?q={}", self.target, item.keyword),
                ))
            }
        }
    }
}

/// Store wrapper that delays writes, widening the window between dedup
/// resolution and the artifact landing.
struct SlowStore {
    inner: Arc<InMemoryStore>,
    delay: Duration,
}

#[async_trait]
impl ArtifactStore for SlowStore {
    async fn store(&self, artifact_id: Uuid, result: &FetchResult) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.store(artifact_id, result).await
    }

    async fn link(&self, artifact_id: Uuid, result: &FetchResult) -> Result<()> {
        self.inner.link(artifact_id, result).await
    }
}

/// Store that always rejects writes.
struct FailingStore;

#[async_trait]
impl ArtifactStore for FailingStore {
    async fn store(&self, _artifact_id: Uuid, _result: &FetchResult) -> Result<()> {
        anyhow::bail!("object store unavailable")
    }

    async fn link(&self, _artifact_id: Uuid, _result: &FetchResult) -> Result<()> {
        anyhow::bail!("object store unavailable")
    }
}

struct Harness {
    config: Config,
    tracker: Arc<JobTracker>,
    store: Arc<InMemoryStore>,
    repo: Arc<InMemoryRepository>,
    limiter: RateLimiter,
}

type Wired = (
    TaskScheduler,
    Arc<JobTracker>,
    Arc<InMemoryStore>,
    Arc<InMemoryRepository>,
);

impl Harness {
    fn new() -> Self {
        let mut config = Config::from_env();
        // Fast backoff so transient-retry scenarios finish quickly.
        config.retry_base_delay = Duration::from_millis(5);
        config.retry_max_delay = Duration::from_millis(20);
        Self {
            limiter: RateLimiter::from_config(&config),
            config,
            tracker: Arc::new(JobTracker::new(Arc::new(NoopSink), 1.0)),
            store: Arc::new(InMemoryStore::new()),
            repo: Arc::new(InMemoryRepository::new()),
        }
    }

    fn scheduler(self, adapters: Vec<Arc<dyn SourceAdapter>>) -> Wired {
        let store = self.store.clone() as Arc<dyn ArtifactStore>;
        self.scheduler_with_store(adapters, store)
    }

    fn scheduler_with_store(
        self,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<dyn ArtifactStore>,
    ) -> Wired {
        let deps = SchedulerDeps::builder()
            .tracker(self.tracker.clone())
            .limiter(Arc::new(self.limiter))
            .retry(RetryPolicy::from_config(&self.config))
            .dedup(Arc::new(DedupIndex::new()))
            .store(store)
            .repo(self.repo.clone() as Arc<dyn JobRepository>)
            .adapters(adapters)
            .build();
        (
            TaskScheduler::new(&self.config, deps),
            self.tracker,
            self.store,
            self.repo,
        )
    }
}

#[tokio::test]
async fn blocked_engine_yields_partial_success() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = ScriptedAdapter::new("engine-a", Behavior::Succeed(None), log.clone());
    let b = ScriptedAdapter::new("engine-b", Behavior::Succeed(None), log.clone());
    let c = ScriptedAdapter::new("engine-c", Behavior::Blocked, log.clone());
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![a, b, c.clone()];

    let harness = Harness::new();
    let tracker = harness.tracker.clone();
    let (job_id, items) = tracker
        .create_job(
            "tester",
            vec!["ml".to_string()],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;
    assert_eq!(items.len(), 3, "one keyword fanned out to 3 engines");

    let (mut scheduler, tracker, store, _repo) = harness.scheduler(adapters);
    scheduler.enqueue(job_id, items);
    scheduler.run_until_idle().await;

    let snapshot = tracker.snapshot(job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.completed_items, 2);
    assert_eq!(snapshot.failed_items, 1);
    assert_eq!(
        snapshot.completed_items + snapshot.failed_items,
        snapshot.total_items
    );
    assert!(snapshot.error_summary.contains(&"blocked".to_string()));
    assert_eq!(store.artifact_count(), 2);
    // Blocked is permanent: the blocked engine was asked exactly once.
    assert_eq!(c.calls(), 1);
}

#[tokio::test]
async fn identical_content_across_jobs_stores_one_artifact() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let fixed = Behavior::Succeed(Some("the very same page body".to_string()));
    let engine = ScriptedAdapter::new("engine-a", fixed, log.clone());
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![engine];

    let harness = Harness::new();
    let tracker = harness.tracker.clone();
    let (job_a, items_a) = tracker
        .create_job(
            "alice",
            vec!["ml".to_string()],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;
    let (job_b, items_b) = tracker
        .create_job(
            "bob",
            vec!["machine learning".to_string()],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;

    let (mut scheduler, tracker, store, _repo) = harness.scheduler(adapters);
    scheduler.enqueue(job_a, items_a);
    scheduler.enqueue(job_b, items_b);
    scheduler.run_until_idle().await;

    assert_eq!(tracker.status(job_a), Some(JobStatus::Completed));
    assert_eq!(tracker.status(job_b), Some(JobStatus::Completed));

    // One stored object, referenced by both jobs.
    assert_eq!(store.artifact_count(), 1);
    let sources = store.all_sources();
    assert_eq!(sources.len(), 2);
    assert!(sources.iter().any(|(job, _, _)| *job == job_a));
    assert!(sources.iter().any(|(job, _, _)| *job == job_b));
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let flaky = ScriptedAdapter::new("engine-a", Behavior::TransientTimes(3), log.clone());
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![flaky.clone()];

    let harness = Harness::new();
    let tracker = harness.tracker.clone();
    let (job_id, items) = tracker
        .create_job(
            "tester",
            vec!["ml".to_string()],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;

    let (mut scheduler, tracker, _store, _repo) = harness.scheduler(adapters);
    scheduler.enqueue(job_id, items);
    scheduler.run_until_idle().await;

    let snapshot = tracker.snapshot(job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.completed_items, 1);
    assert_eq!(snapshot.failed_items, 0);
    // Three transient failures plus the successful attempt.
    assert_eq!(flaky.calls(), 4);
}

#[tokio::test]
async fn exhausted_retry_budget_fails_the_item() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let broken = ScriptedAdapter::new("engine-a", Behavior::TransientTimes(99), log.clone());
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![broken.clone()];

    let mut harness = Harness::new();
    harness.config.retry_budget = 3;
    let tracker = harness.tracker.clone();
    let (job_id, items) = tracker
        .create_job(
            "tester",
            vec!["ml".to_string()],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;

    let (mut scheduler, tracker, _store, _repo) = harness.scheduler(adapters);
    scheduler.enqueue(job_id, items);
    scheduler.run_until_idle().await;

    let snapshot = tracker.snapshot(job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.failed_items, 1);
    assert!(snapshot.error_summary.contains(&"transient".to_string()));
    assert_eq!(broken.calls(), 3, "budget of 3 attempts, no more");
}

#[tokio::test]
async fn cancelling_running_job_stops_dispatch() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let slow = ScriptedAdapter::new(
        "engine-a",
        Behavior::Slow(Duration::from_millis(100)),
        log.clone(),
    );
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![slow.clone()];

    let mut harness = Harness::new();
    harness.config.max_in_flight_web = 1;
    let tracker = harness.tracker.clone();
    let (job_id, items) = tracker
        .create_job(
            "tester",
            vec![
                "one".to_string(),
                "two".to_string(),
                "three".to_string(),
                "four".to_string(),
            ],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;
    assert_eq!(items.len(), 4);

    let (mut scheduler, tracker, store, _repo) = harness.scheduler(adapters);
    scheduler.enqueue(job_id, items);

    // First pass puts one item in flight (ceiling 1), then cancel.
    scheduler.step().await;
    tracker.cancel(job_id).unwrap();
    scheduler.run_until_idle().await;

    assert_eq!(tracker.status(job_id), Some(JobStatus::Cancelled));
    // Only the already-in-flight fetch ever ran; its late result was
    // discarded rather than stored.
    assert!(slow.calls() <= 1, "dispatch stopped after cancel");
    assert_eq!(store.artifact_count(), 0);
}

#[tokio::test]
async fn rate_limited_job_does_not_block_the_next_job() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = ScriptedAdapter::new("engine-a", Behavior::Succeed(None), log.clone());
    let b = ScriptedAdapter::new("engine-b", Behavior::Succeed(None), log.clone());
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![a, b];

    let mut harness = Harness::new();
    // engine-a: one request per 200ms window, so job one gets deferred.
    harness.limiter = RateLimiter::from_config(&harness.config).with_override(
        "web_search:engine-a",
        RateConfig {
            ceiling: 1,
            window: Duration::from_millis(200),
        },
    );
    let tracker = harness.tracker.clone();

    let only_a: Vec<Arc<dyn SourceAdapter>> = vec![adapters[0].clone()];
    let only_b: Vec<Arc<dyn SourceAdapter>> = vec![adapters[1].clone()];
    let (job_one, items_one) = tracker
        .create_job(
            "tester",
            vec!["first".to_string(), "second".to_string()],
            vec![SourceType::WebSearch],
            &only_a,
            &NoopExpander,
        )
        .await;
    let (job_two, items_two) = tracker
        .create_job(
            "tester",
            vec!["third".to_string()],
            vec![SourceType::WebSearch],
            &only_b,
            &NoopExpander,
        )
        .await;

    let (mut scheduler, tracker, _store, _repo) = harness.scheduler(adapters);
    scheduler.enqueue(job_one, items_one);
    scheduler.enqueue(job_two, items_two);
    scheduler.run_until_idle().await;

    assert_eq!(tracker.status(job_one), Some(JobStatus::Completed));
    assert_eq!(tracker.status(job_two), Some(JobStatus::Completed));

    // Job two's engine-b fetch ran before job one's deferred second
    // engine-a fetch: the rate-limited job was skipped, not waited on.
    let calls = log.lock().unwrap().clone();
    let b_pos = calls.iter().position(|c| c.starts_with("engine-b")).unwrap();
    let second_a_pos = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with("engine-a"))
        .map(|(i, _)| i)
        .nth(1)
        .unwrap();
    assert!(
        b_pos < second_a_pos,
        "engine-b call should precede the deferred engine-a call"
    );
}

#[tokio::test]
async fn concurrent_duplicate_content_links_after_store_completes() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let body = "the very same page body served twice".to_string();
    let a = ScriptedAdapter::new("engine-a", Behavior::Succeed(Some(body.clone())), log.clone());
    let b = ScriptedAdapter::new("engine-b", Behavior::Succeed(Some(body)), log.clone());
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![a, b];

    let harness = Harness::new();
    let tracker = harness.tracker.clone();
    let only_a: Vec<Arc<dyn SourceAdapter>> = vec![adapters[0].clone()];
    let only_b: Vec<Arc<dyn SourceAdapter>> = vec![adapters[1].clone()];
    let (job_a, items_a) = tracker
        .create_job(
            "alice",
            vec!["ml".to_string()],
            vec![SourceType::WebSearch],
            &only_a,
            &NoopExpander,
        )
        .await;
    let (job_b, items_b) = tracker
        .create_job(
            "bob",
            vec!["ml".to_string()],
            vec![SourceType::WebSearch],
            &only_b,
            &NoopExpander,
        )
        .await;

    // Slow writes: the second identical fetch resolves dedup while the
    // first store is still in flight and must wait for it, not fail.
    let slow = Arc::new(SlowStore {
        inner: harness.store.clone(),
        delay: Duration::from_millis(100),
    });
    let (mut scheduler, tracker, store, _repo) = harness.scheduler_with_store(adapters, slow);
    scheduler.enqueue(job_a, items_a);
    scheduler.enqueue(job_b, items_b);
    scheduler.run_until_idle().await;

    assert_eq!(tracker.status(job_a), Some(JobStatus::Completed));
    assert_eq!(tracker.status(job_b), Some(JobStatus::Completed));
    assert_eq!(store.artifact_count(), 1);
    let sources = store.all_sources();
    assert_eq!(sources.len(), 2);
    assert!(sources.iter().any(|(job, _, _)| *job == job_a));
    assert!(sources.iter().any(|(job, _, _)| *job == job_b));
}

#[tokio::test]
async fn storage_failure_is_retried_before_failing_the_item() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = ScriptedAdapter::new("engine-a", Behavior::Succeed(None), log.clone());
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![engine.clone()];

    let mut harness = Harness::new();
    harness.config.retry_budget = 2;
    let tracker = harness.tracker.clone();
    let (job_id, items) = tracker
        .create_job(
            "tester",
            vec!["ml".to_string()],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;

    let (mut scheduler, tracker, _store, _repo) =
        harness.scheduler_with_store(adapters, Arc::new(FailingStore));
    scheduler.enqueue(job_id, items);
    scheduler.run_until_idle().await;

    let snapshot = tracker.snapshot(job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.failed_items, 1);
    assert!(snapshot.error_summary.contains(&"transient".to_string()));
    assert_eq!(engine.calls(), 2, "item re-attempted after the storage failure");
}

#[tokio::test]
async fn missing_adapter_fails_the_item_and_terminalizes_the_job() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let planned = ScriptedAdapter::new("engine-a", Behavior::Succeed(None), log);
    let planning: Vec<Arc<dyn SourceAdapter>> = vec![planned];

    let harness = Harness::new();
    let tracker = harness.tracker.clone();
    let (job_id, items) = tracker
        .create_job(
            "tester",
            vec!["ml".to_string()],
            vec![SourceType::WebSearch],
            &planning,
            &NoopExpander,
        )
        .await;

    // Scheduler wired without any adapters: dispatch cannot route the item.
    let (mut scheduler, tracker, _store, repo) = harness.scheduler(Vec::new());
    scheduler.enqueue(job_id, items);
    scheduler.run_until_idle().await;

    let snapshot = tracker.snapshot(job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.failed_items, 1);
    assert_eq!(
        snapshot.completed_items + snapshot.failed_items,
        snapshot.total_items
    );
    assert!(snapshot.error_summary.contains(&"not_found".to_string()));

    // Persistence is a spawned task; give it a beat to land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let saved = repo.load(job_id).await.unwrap().expect("snapshot persisted");
    assert_eq!(saved.status, JobStatus::Failed);
}

#[tokio::test]
async fn cancelled_and_empty_jobs_reach_the_repository() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let slow = ScriptedAdapter::new(
        "engine-a",
        Behavior::Slow(Duration::from_millis(100)),
        log.clone(),
    );
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![slow];

    let mut harness = Harness::new();
    harness.config.max_in_flight_web = 1;
    let tracker = harness.tracker.clone();
    let (cancelled_job, items) = tracker
        .create_job(
            "tester",
            vec!["one".to_string(), "two".to_string()],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;
    // No keywords expands to no work: the job is born completed.
    let (empty_job, no_items) = tracker
        .create_job(
            "tester",
            Vec::new(),
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;
    assert!(no_items.is_empty());

    let (mut scheduler, tracker, _store, repo) = harness.scheduler(adapters);
    scheduler.enqueue(cancelled_job, items);
    scheduler.enqueue(empty_job, no_items);

    scheduler.step().await;
    tracker.cancel(cancelled_job).unwrap();
    scheduler.run_until_idle().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let saved = repo
        .load(cancelled_job)
        .await
        .unwrap()
        .expect("cancelled job persisted");
    assert_eq!(saved.status, JobStatus::Cancelled);
    let saved = repo
        .load(empty_job)
        .await
        .unwrap()
        .expect("empty job persisted");
    assert_eq!(saved.status, JobStatus::Completed);
}

#[tokio::test]
async fn full_worker_pool_does_not_spend_rate_budget() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let engine = ScriptedAdapter::new("engine-a", Behavior::Succeed(None), log.clone());
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![engine];

    let mut harness = Harness::new();
    harness.config.max_in_flight_web = 1;
    // Exactly as many admissions as items: one stamp wasted on a fetch
    // that never started would stall the second item for the full window.
    harness.limiter = RateLimiter::from_config(&harness.config).with_override(
        "web_search:engine-a",
        RateConfig {
            ceiling: 2,
            window: Duration::from_secs(60),
        },
    );
    let tracker = harness.tracker.clone();
    let (job_id, items) = tracker
        .create_job(
            "tester",
            vec!["one".to_string(), "two".to_string()],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;

    let (mut scheduler, tracker, _store, _repo) = harness.scheduler(adapters);
    scheduler.enqueue(job_id, items);
    scheduler.run_until_idle().await;

    let snapshot = tracker.snapshot(job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.completed_items, 2);
}

#[tokio::test]
async fn fetch_timeout_classifies_as_transient() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let stuck = ScriptedAdapter::new(
        "engine-a",
        Behavior::Slow(Duration::from_secs(5)),
        log.clone(),
    );
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![stuck];

    let mut harness = Harness::new();
    harness.config.fetch_timeout = Duration::from_millis(50);
    harness.config.retry_budget = 1;
    let tracker = harness.tracker.clone();
    let (job_id, items) = tracker
        .create_job(
            "tester",
            vec!["ml".to_string()],
            vec![SourceType::WebSearch],
            &adapters,
            &NoopExpander,
        )
        .await;

    let (mut scheduler, tracker, _store, _repo) = harness.scheduler(adapters);
    scheduler.enqueue(job_id, items);
    scheduler.run_until_idle().await;

    let snapshot = tracker.snapshot(job_id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot.error_summary.contains(&"transient".to_string()));
}
