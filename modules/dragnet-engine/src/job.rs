//! Job lifecycle owner: pending → running → {completed, failed, cancelled}.
//!
//! All job mutation goes through this tracker. Counter updates are
//! idempotent per work item (the first terminal transition wins), progress
//! never decreases, and every transition publishes a best-effort event to
//! the progress sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use dragnet_common::{
    DragnetError, FailureKind, JobEvent, JobSnapshot, JobStatus, KeywordSet, SourceType, WorkItem,
};

use crate::adapters::SourceAdapter;
use crate::external::{KeywordExpander, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemState {
    Pending,
    Succeeded,
    Failed,
}

struct JobRecord {
    snapshot: JobSnapshot,
    items: HashMap<Uuid, ItemState>,
}

/// Outcome of recording a terminal item state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// False when the item had already reached a terminal state (duplicate
    /// scheduling pass) and nothing was counted.
    pub counted: bool,
    /// True when this update drove the job itself to a terminal status.
    pub job_now_terminal: bool,
}

pub struct JobTracker {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    sink: Arc<dyn ProgressSink>,
    /// Fraction of items allowed to fail permanently while the job still
    /// completes. 1.0: a single success is enough to complete.
    failure_tolerance: f64,
}

impl JobTracker {
    pub fn new(sink: Arc<dyn ProgressSink>, failure_tolerance: f64) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            sink,
            failure_tolerance: failure_tolerance.clamp(0.0, 1.0),
        }
    }

    /// Create a job: expand keywords (falling back to the original set if
    /// expansion is unavailable), enumerate (keyword × adapter) work items
    /// for the requested source types, and register the pending job.
    pub async fn create_job(
        &self,
        owner: &str,
        keywords: Vec<String>,
        source_types: Vec<SourceType>,
        adapters: &[Arc<dyn SourceAdapter>],
        expander: &dyn KeywordExpander,
    ) -> (Uuid, Vec<WorkItem>) {
        let expanded = match expander.expand(&keywords).await {
            Ok(extra) => extra,
            Err(e) => {
                warn!(error = %e, "Keyword expansion unavailable, using original set");
                Vec::new()
            }
        };
        let keyword_set = KeywordSet {
            original: keywords,
            expanded,
        };

        let job_id = Uuid::new_v4();
        let mut items = Vec::new();
        for keyword in keyword_set.effective() {
            for adapter in adapters {
                if source_types.contains(&adapter.source_type()) {
                    items.push(WorkItem::new(
                        job_id,
                        &keyword,
                        adapter.source_type(),
                        adapter.target(),
                    ));
                }
            }
        }

        // A request that expands to nothing has no work to supervise.
        let status = if items.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::Pending
        };
        let snapshot = JobSnapshot {
            id: job_id,
            owner: owner.to_string(),
            source_types,
            keywords: keyword_set,
            status,
            progress: if items.is_empty() { 100 } else { 0 },
            total_items: items.len() as u32,
            completed_items: 0,
            failed_items: 0,
            error_summary: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let event = JobEvent {
            job_id,
            status: snapshot.status,
            progress: snapshot.progress,
        };

        let record = JobRecord {
            items: items.iter().map(|i| (i.id, ItemState::Pending)).collect(),
            snapshot,
        };
        self.jobs
            .lock()
            .expect("job map lock poisoned")
            .insert(job_id, record);
        self.sink.publish(&event);

        (job_id, items)
    }

    /// First successful dispatch moves the job from pending to running.
    pub fn mark_running(&self, job_id: Uuid) {
        let event = {
            let mut jobs = self.jobs.lock().expect("job map lock poisoned");
            let Some(record) = jobs.get_mut(&job_id) else {
                return;
            };
            if record.snapshot.status != JobStatus::Pending {
                return;
            }
            record.snapshot.status = JobStatus::Running;
            record.snapshot.started_at = Some(Utc::now());
            JobEvent {
                job_id,
                status: JobStatus::Running,
                progress: record.snapshot.progress,
            }
        };
        self.sink.publish(&event);
    }

    pub fn record_success(&self, job_id: Uuid, item_id: Uuid) -> RecordOutcome {
        self.record_terminal(job_id, item_id, ItemState::Succeeded, None)
    }

    pub fn record_failure(&self, job_id: Uuid, item_id: Uuid, kind: FailureKind) -> RecordOutcome {
        self.record_terminal(job_id, item_id, ItemState::Failed, Some(kind))
    }

    fn record_terminal(
        &self,
        job_id: Uuid,
        item_id: Uuid,
        state: ItemState,
        kind: Option<FailureKind>,
    ) -> RecordOutcome {
        let (outcome, event) = {
            let mut jobs = self.jobs.lock().expect("job map lock poisoned");
            let Some(record) = jobs.get_mut(&job_id) else {
                return RecordOutcome {
                    counted: false,
                    job_now_terminal: false,
                };
            };

            // Idempotence against duplicate scheduling passes.
            match record.items.get_mut(&item_id) {
                Some(existing @ ItemState::Pending) => *existing = state,
                _ => {
                    return RecordOutcome {
                        counted: false,
                        job_now_terminal: false,
                    }
                }
            }

            match state {
                ItemState::Succeeded => record.snapshot.completed_items += 1,
                ItemState::Failed => {
                    record.snapshot.failed_items += 1;
                    if let Some(kind) = kind {
                        let label = kind.to_string();
                        if !record.snapshot.error_summary.contains(&label) {
                            record.snapshot.error_summary.push(label);
                        }
                    }
                }
                ItemState::Pending => unreachable!("terminal state required"),
            }

            let snapshot = &mut record.snapshot;
            let progress = if snapshot.total_items == 0 {
                100
            } else {
                (snapshot.completed_items * 100 / snapshot.total_items) as u8
            };
            // Monotonic: a recomputation never lowers reported progress.
            snapshot.progress = snapshot.progress.max(progress);

            let mut job_now_terminal = false;
            let all_terminal =
                snapshot.completed_items + snapshot.failed_items == snapshot.total_items;
            // Items can all fail at dispatch time (no adapter registered for
            // the target), so a still-pending job terminalizes too. Cancelled
            // jobs are already terminal and keep their status.
            if all_terminal && !snapshot.status.is_terminal() {
                snapshot.status = if exceeded_tolerance(
                    snapshot.failed_items,
                    snapshot.total_items,
                    self.failure_tolerance,
                ) {
                    JobStatus::Failed
                } else {
                    JobStatus::Completed
                };
                snapshot.completed_at = Some(Utc::now());
                job_now_terminal = true;
            }

            (
                RecordOutcome {
                    counted: true,
                    job_now_terminal,
                },
                JobEvent {
                    job_id,
                    status: snapshot.status,
                    progress: snapshot.progress,
                },
            )
        };
        self.sink.publish(&event);
        outcome
    }

    /// Cancel a pending or running job. Stops new dispatch; in-flight
    /// fetches are left to finish.
    pub fn cancel(&self, job_id: Uuid) -> Result<(), DragnetError> {
        let event = {
            let mut jobs = self.jobs.lock().expect("job map lock poisoned");
            let record = jobs.get_mut(&job_id).ok_or(DragnetError::UnknownJob(job_id))?;
            if record.snapshot.status.is_terminal() {
                return Err(DragnetError::InvalidCancel {
                    id: job_id,
                    status: record.snapshot.status.to_string(),
                });
            }
            record.snapshot.status = JobStatus::Cancelled;
            record.snapshot.completed_at = Some(Utc::now());
            JobEvent {
                job_id,
                status: JobStatus::Cancelled,
                progress: record.snapshot.progress,
            }
        };
        self.sink.publish(&event);
        Ok(())
    }

    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.jobs
            .lock()
            .expect("job map lock poisoned")
            .get(&job_id)
            .map(|r| r.snapshot.status)
    }

    pub fn is_cancelled(&self, job_id: Uuid) -> bool {
        self.status(job_id) == Some(JobStatus::Cancelled)
    }

    pub fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.jobs
            .lock()
            .expect("job map lock poisoned")
            .get(&job_id)
            .map(|r| r.snapshot.clone())
    }
}

/// Failure-tolerance rule: the job fails when the permanently-failed
/// fraction reaches the threshold. With the default of 1.0 a job fails
/// only when every item failed.
fn exceeded_tolerance(failed: u32, total: u32, tolerance: f64) -> bool {
    if failed == 0 || total == 0 {
        return false;
    }
    failed as f64 >= tolerance * total as f64
}
