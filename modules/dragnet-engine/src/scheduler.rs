//! Bounded-concurrency dispatcher.
//!
//! `step()` is one scheduling pass: it first applies outcomes from finished
//! fetches, then dispatches eligible work items. Jobs are serviced in
//! creation order, FIFO within a job; items deferred by the rate limiter or
//! a backoff delay go back to the pending queue instead of occupying a
//! worker slot, so a fully rate-limited job never blocks the next one.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use dragnet_common::{Config, FailureKind, FetchError, SourceType, WorkItem};

use crate::adapters::SourceAdapter;
use crate::dedup::{content_hash, DedupIndex};
use crate::external::{ArtifactStore, JobRepository};
use crate::job::JobTracker;
use crate::rate::{Admission, RateLimiter};
use crate::retry::{RetryDecision, RetryPolicy};

/// Everything the scheduler needs injected. Adapters are trait objects: the
/// scheduler never sees a concrete adapter type.
#[derive(TypedBuilder)]
pub struct SchedulerDeps {
    pub tracker: Arc<JobTracker>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
    pub dedup: Arc<DedupIndex>,
    pub store: Arc<dyn ArtifactStore>,
    pub repo: Arc<dyn JobRepository>,
    pub adapters: Vec<Arc<dyn SourceAdapter>>,
}

struct QueuedItem {
    item: WorkItem,
    /// Set by rate-limit deferral or retry backoff.
    not_before: Option<Instant>,
}

struct JobQueue {
    job_id: Uuid,
    items: VecDeque<QueuedItem>,
}

enum TaskOutcome {
    Success { item: WorkItem },
    Retry { item: WorkItem, delay: Duration },
    Failed { item: WorkItem, kind: FailureKind },
    /// Fetch finished after its job was cancelled; result dropped.
    Discarded { item: WorkItem },
}

pub struct TaskScheduler {
    tracker: Arc<JobTracker>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    dedup: Arc<DedupIndex>,
    store: Arc<dyn ArtifactStore>,
    repo: Arc<dyn JobRepository>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    permits: HashMap<SourceType, Arc<Semaphore>>,
    fetch_timeout: Duration,
    store_after_cancel: bool,
    queues: VecDeque<JobQueue>,
    in_flight: JoinSet<TaskOutcome>,
}

impl TaskScheduler {
    pub fn new(config: &Config, deps: SchedulerDeps) -> Self {
        let mut permits = HashMap::new();
        permits.insert(
            SourceType::WebSearch,
            Arc::new(Semaphore::new(config.max_in_flight_web)),
        );
        permits.insert(
            SourceType::Paper,
            Arc::new(Semaphore::new(config.max_in_flight_paper)),
        );
        permits.insert(
            SourceType::Government,
            Arc::new(Semaphore::new(config.max_in_flight_government)),
        );
        Self {
            tracker: deps.tracker,
            limiter: deps.limiter,
            retry: deps.retry,
            dedup: deps.dedup,
            store: deps.store,
            repo: deps.repo,
            adapters: deps.adapters,
            permits,
            fetch_timeout: config.fetch_timeout,
            store_after_cancel: config.store_after_cancel,
            queues: VecDeque::new(),
            in_flight: JoinSet::new(),
        }
    }

    /// Add a job's work items to the dispatch queue. Jobs are serviced in
    /// enqueue order.
    pub fn enqueue(&mut self, job_id: Uuid, items: Vec<WorkItem>) {
        info!(job_id = %job_id, items = items.len(), "Job enqueued");
        self.queues.push_back(JobQueue {
            job_id,
            items: items
                .into_iter()
                .map(|item| QueuedItem {
                    item,
                    not_before: None,
                })
                .collect(),
        });
    }

    /// One scheduling pass. Applies finished fetch outcomes, then
    /// dispatches every currently-eligible item. Returns the number of
    /// outcomes applied plus items dispatched; safe to call repeatedly.
    pub async fn step(&mut self) -> usize {
        let mut processed = self.drain_finished().await;
        processed += self.dispatch_pass();
        processed
    }

    /// Drive `step()` until every queue is empty and no fetch is in
    /// flight. Used by the runner and integration tests.
    pub async fn run_until_idle(&mut self) {
        loop {
            let processed = self.step().await;
            if self.idle() {
                break;
            }
            if processed == 0 {
                // Nothing eligible: wait for an in-flight fetch, or for
                // the nearest deferral to elapse.
                if !self.in_flight.is_empty() {
                    if let Some(joined) = self.in_flight.join_next().await {
                        self.apply_outcome(joined).await;
                    }
                } else {
                    let wait = self
                        .nearest_deferral()
                        .unwrap_or(Duration::from_millis(25));
                    tokio::time::sleep(wait.min(Duration::from_millis(250))).await;
                }
            }
        }
    }

    pub fn idle(&self) -> bool {
        self.in_flight.is_empty() && self.queues.iter().all(|q| q.items.is_empty())
    }

    async fn drain_finished(&mut self) -> usize {
        let mut applied = 0;
        while let Some(joined) = self.in_flight.try_join_next() {
            self.apply_outcome(joined).await;
            applied += 1;
        }
        applied
    }

    fn dispatch_pass(&mut self) -> usize {
        let now = Instant::now();
        let mut dispatched = 0;
        let job_count = self.queues.len();

        for _ in 0..job_count {
            let Some(mut queue) = self.queues.pop_front() else {
                break;
            };

            // Cancelled or terminal job: stop issuing its items entirely.
            let status = self.tracker.status(queue.job_id);
            if status.map_or(true, |s| s.is_terminal()) {
                if !queue.items.is_empty() {
                    debug!(
                        job_id = %queue.job_id,
                        dropped = queue.items.len(),
                        "Dropping pending items for terminal job"
                    );
                }
                // Jobs that went terminal outside the record path (cancel,
                // zero-item jobs) get persisted here.
                self.persist_snapshot(queue.job_id);
                continue;
            }

            dispatched += self.dispatch_from(&mut queue, now);
            self.queues.push_back(queue);
        }

        dispatched
    }

    /// Dispatch every eligible item at the front of one job's queue.
    /// Ineligible items rotate to the back so an eligible item behind a
    /// deferred one still gets a chance this pass.
    fn dispatch_from(&mut self, queue: &mut JobQueue, now: Instant) -> usize {
        let mut dispatched = 0;
        let len = queue.items.len();

        for _ in 0..len {
            let Some(mut queued) = queue.items.pop_front() else {
                break;
            };

            if queued.not_before.is_some_and(|t| t > now) {
                queue.items.push_back(queued);
                continue;
            }

            let Some(semaphore) = self.permits.get(&queued.item.source_type) else {
                queue.items.push_back(queued);
                continue;
            };
            // Take the worker slot before spending a rate-window stamp, so
            // pool pressure does not burn admission budget on fetches that
            // never start.
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                // Pool for this source type is full; put the item back at
                // the front so FIFO order holds next pass.
                queue.items.push_front(queued);
                break;
            };

            match self.limiter.admit(&queued.item.target_key()) {
                Admission::Allowed => {}
                Admission::Denied { retry_after } => {
                    debug!(
                        target = queued.item.target_key().as_str(),
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Rate limited, deferring item"
                    );
                    queued.not_before = Some(now + retry_after);
                    queue.items.push_back(queued);
                    drop(permit);
                    continue;
                }
            }

            let Some(adapter) = self.adapter_for(&queued.item) else {
                warn!(
                    target = queued.item.target_key().as_str(),
                    "No adapter registered for target, failing item"
                );
                let outcome = self
                    .tracker
                    .record_failure(queue.job_id, queued.item.id, FailureKind::NotFound);
                if outcome.job_now_terminal {
                    self.persist_snapshot(queue.job_id);
                }
                continue;
            };

            let mut item = queued.item;
            item.attempt_count += 1;
            self.tracker.mark_running(item.job_id);

            let tracker = self.tracker.clone();
            let dedup = self.dedup.clone();
            let store = self.store.clone();
            let retry = self.retry.clone();
            let fetch_timeout = self.fetch_timeout;
            let store_after_cancel = self.store_after_cancel;

            self.in_flight.spawn(async move {
                let _permit = permit;
                run_fetch(
                    adapter,
                    item,
                    tracker,
                    dedup,
                    store,
                    retry,
                    fetch_timeout,
                    store_after_cancel,
                )
                .await
            });
            dispatched += 1;
        }

        dispatched
    }

    async fn apply_outcome(&mut self, joined: Result<TaskOutcome, tokio::task::JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Fetch task panicked or was aborted");
                return;
            }
        };

        match outcome {
            TaskOutcome::Success { item } => {
                let record = self.tracker.record_success(item.job_id, item.id);
                if record.job_now_terminal {
                    self.persist_snapshot(item.job_id);
                }
            }
            TaskOutcome::Failed { item, kind } => {
                info!(
                    job_id = %item.job_id,
                    keyword = item.keyword.as_str(),
                    target = item.adapter_target.as_str(),
                    kind = %kind,
                    attempts = item.attempt_count,
                    "Work item permanently failed"
                );
                let record = self.tracker.record_failure(item.job_id, item.id, kind);
                if record.job_now_terminal {
                    self.persist_snapshot(item.job_id);
                }
            }
            TaskOutcome::Retry { item, delay } => {
                debug!(
                    job_id = %item.job_id,
                    target = item.adapter_target.as_str(),
                    attempts = item.attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    "Requeueing item after backoff"
                );
                self.requeue(item, Instant::now() + delay);
            }
            TaskOutcome::Discarded { item } => {
                debug!(job_id = %item.job_id, "Discarded result for cancelled job");
            }
        }
    }

    fn requeue(&mut self, item: WorkItem, not_before: Instant) {
        if let Some(queue) = self.queues.iter_mut().find(|q| q.job_id == item.job_id) {
            queue.items.push_back(QueuedItem {
                item,
                not_before: Some(not_before),
            });
        }
        // No queue means the job was dropped as terminal; nothing to do.
    }

    fn persist_snapshot(&self, job_id: Uuid) {
        if let Some(snapshot) = self.tracker.snapshot(job_id) {
            let repo = self.repo.clone();
            tokio::spawn(async move {
                if let Err(e) = repo.save(&snapshot).await {
                    warn!(job_id = %snapshot.id, error = %e, "Failed to persist job snapshot");
                }
            });
        }
    }

    fn adapter_for(&self, item: &WorkItem) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.source_type() == item.source_type && a.target() == item.adapter_target)
            .cloned()
    }

    fn nearest_deferral(&self) -> Option<Duration> {
        let now = Instant::now();
        self.queues
            .iter()
            .flat_map(|q| q.items.iter())
            .filter_map(|q| q.not_before)
            .map(|t| t.saturating_duration_since(now))
            .min()
    }
}

/// One supervised fetch: hard wall-clock timeout, dedup registration, and
/// storage handoff. Failures come back classified, never as raw errors.
#[allow(clippy::too_many_arguments)]
async fn run_fetch(
    adapter: Arc<dyn SourceAdapter>,
    item: WorkItem,
    tracker: Arc<JobTracker>,
    dedup: Arc<DedupIndex>,
    store: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    store_after_cancel: bool,
) -> TaskOutcome {
    let fetched = match tokio::time::timeout(fetch_timeout, adapter.fetch(&item)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Transient(format!(
            "fetch exceeded {}s wall clock",
            fetch_timeout.as_secs()
        ))),
    };

    match fetched {
        Ok(mut result) => {
            if tracker.is_cancelled(item.job_id) && !store_after_cancel {
                return TaskOutcome::Discarded { item };
            }

            result.content_hash = content_hash(&result.raw_content);
            let candidate = Uuid::new_v4();
            // The store runs inside the dedup resolution, so a duplicate
            // only links once the winning store has completed.
            let resolved = dedup
                .resolve(&result.content_hash, candidate, || async {
                    store.store(candidate, &result).await
                })
                .await;

            let stored = match resolved {
                Ok(reg) if reg.created => Ok(()),
                Ok(reg) => store.link(reg.artifact_id, &result).await,
                Err(e) => Err(e),
            };

            match stored {
                Ok(()) => TaskOutcome::Success { item },
                Err(e) => {
                    warn!(job_id = %item.job_id, error = %e, "Artifact storage failed");
                    match retry.decide(FailureKind::Transient, item.attempt_count) {
                        RetryDecision::RetryAfter(delay) => TaskOutcome::Retry { item, delay },
                        RetryDecision::Fail => TaskOutcome::Failed {
                            item,
                            kind: FailureKind::Transient,
                        },
                    }
                }
            }
        }
        Err(e) => {
            let kind = e.kind();
            match retry.decide(kind, item.attempt_count) {
                RetryDecision::RetryAfter(delay) => TaskOutcome::Retry { item, delay },
                RetryDecision::Fail => TaskOutcome::Failed { item, kind },
            }
        }
    }
}
