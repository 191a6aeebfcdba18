//! Background analysis jobs with progress and cancellation.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fa_core::AnalysisError;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    /// Percent complete, 0 to 100
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct JobEntry {
    record: JobRecord,
    cancel: CancellationToken,
}

/// Handle given to the task running a job.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub id: String,
    pub cancel: CancellationToken,
}

pub struct JobTracker {
    jobs: DashMap<String, JobEntry>,
    /// Reserved running slots; taken in `start`, released on the first
    /// transition out of `Running`.
    active: AtomicUsize,
    retention: Duration,
    max_running: usize,
}

impl JobTracker {
    pub fn new(retention: Duration, max_running: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            active: AtomicUsize::new(0),
            retention,
            max_running: max_running.max(1),
        }
    }

    pub fn running(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Register a running job, or `None` when the concurrency limit is reached.
    pub fn start(&self, kind: &str) -> Option<JobTicket> {
        self.prune();
        let reserved = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| {
                (running < self.max_running).then_some(running + 1)
            });
        if reserved.is_err() {
            tracing::warn!("Rejecting {} job: {} jobs running", kind, self.max_running);
            return None;
        }
        let id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        self.jobs.insert(
            id.clone(),
            JobEntry {
                record: JobRecord {
                    id: id.clone(),
                    kind: kind.to_string(),
                    status: JobStatus::Running,
                    progress: 0.0,
                    created_at: now,
                    updated_at: now,
                    result: None,
                    error_code: None,
                    error: None,
                },
                cancel: cancel.clone(),
            },
        );
        tracing::info!("Job {} ({}) started", id, kind);
        Some(JobTicket { id, cancel })
    }

    /// Progress only moves forward while the job is running.
    pub fn set_progress(&self, id: &str, progress: f64) {
        if let Some(mut entry) = self.jobs.get_mut(id) {
            let record = &mut entry.record;
            if record.status == JobStatus::Running && progress > record.progress {
                record.progress = progress.min(100.0);
                record.updated_at = Utc::now();
            }
        }
    }

    pub fn complete(&self, id: &str, result: Value) {
        self.finish(id, |record| {
            record.status = JobStatus::Completed;
            record.progress = 100.0;
            record.result = Some(result);
        });
    }

    pub fn fail(&self, id: &str, err: &AnalysisError) {
        self.finish(id, |record| {
            record.status = match err {
                AnalysisError::Cancelled => JobStatus::Cancelled,
                _ => JobStatus::Failed,
            };
            record.error_code = Some(err.code().to_string());
            record.error = Some(err.to_string());
        });
    }

    /// Cancel a job. Returns its status afterwards, or `None` if unknown.
    pub fn cancel(&self, id: &str) -> Option<JobStatus> {
        let mut entry = self.jobs.get_mut(id)?;
        if entry.record.status == JobStatus::Running {
            entry.cancel.cancel();
            self.release_slot();
            entry.record.status = JobStatus::Cancelled;
            entry.record.error_code = Some(AnalysisError::Cancelled.code().to_string());
            entry.record.error = Some(AnalysisError::Cancelled.to_string());
            entry.record.updated_at = Utc::now();
            tracing::info!("Job {} cancelled", id);
        }
        Some(entry.record.status)
    }

    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.get(id).map(|entry| entry.record.clone())
    }

    /// Newest first, without result payloads.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .jobs
            .iter()
            .map(|entry| JobRecord {
                result: None,
                ..entry.record.clone()
            })
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Drop finished jobs older than the retention window.
    pub fn prune(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return;
        };
        let cutoff = Utc::now() - retention;
        self.jobs
            .retain(|_, entry| !entry.record.status.is_finished() || entry.record.updated_at > cutoff);
    }

    // A cancelled job never transitions again, so late results are dropped.
    fn finish(&self, id: &str, apply: impl FnOnce(&mut JobRecord)) {
        let Some(mut entry) = self.jobs.get_mut(id) else {
            return;
        };
        if entry.record.status != JobStatus::Running {
            tracing::debug!("Job {} already {:?}, ignoring outcome", id, entry.record.status);
            return;
        }
        apply(&mut entry.record);
        self.release_slot();
        entry.record.updated_at = Utc::now();
        tracing::info!("Job {} finished: {:?}", id, entry.record.status);
    }

    // Callers hold the entry lock while leaving `Running`, so each job
    // releases exactly once.
    fn release_slot(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| running.checked_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker() -> JobTracker {
        JobTracker::new(Duration::from_secs(3600), 2)
    }

    #[test]
    fn lifecycle_and_progress() {
        let jobs = tracker();
        let ticket = jobs.start("visibility").unwrap();
        jobs.set_progress(&ticket.id, 40.0);
        jobs.set_progress(&ticket.id, 20.0);
        assert_eq!(jobs.get(&ticket.id).unwrap().progress, 40.0);

        jobs.complete(&ticket.id, json!({"ok": true}));
        let record = jobs.get(&ticket.id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100.0);
        assert_eq!(record.result, Some(json!({"ok": true})));
        assert!(jobs.list()[0].result.is_none());
    }

    #[test]
    fn cancelled_job_discards_late_result() {
        let jobs = tracker();
        let ticket = jobs.start("visibility").unwrap();
        assert_eq!(jobs.cancel(&ticket.id), Some(JobStatus::Cancelled));
        assert!(ticket.cancel.is_cancelled());

        jobs.complete(&ticket.id, json!({"late": true}));
        let record = jobs.get(&ticket.id).unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.result.is_none());
        assert_eq!(record.error_code.as_deref(), Some("CANCELLED"));
        assert_eq!(jobs.cancel("missing"), None);
    }

    #[test]
    fn failure_records_error_code() {
        let jobs = tracker();
        let ticket = jobs.start("visibility").unwrap();
        jobs.fail(&ticket.id, &AnalysisError::ElevationUnavailable("down".to_string()));
        let record = jobs.get(&ticket.id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error_code.as_deref(), Some("ELEVATION_UNAVAILABLE"));
    }

    #[test]
    fn concurrency_limit_and_prune() {
        let jobs = JobTracker::new(Duration::ZERO, 2);
        let a = jobs.start("a").unwrap();
        let _b = jobs.start("b").unwrap();
        assert!(jobs.start("c").is_none());

        jobs.complete(&a.id, Value::Null);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(jobs.start("d").is_some());
        assert!(jobs.get(&a.id).is_none(), "finished job past retention is pruned");
    }

    #[test]
    fn concurrent_starts_never_exceed_the_limit() {
        let jobs = JobTracker::new(Duration::from_secs(3600), 3);
        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| jobs.start("visibility").is_some()))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|admitted| *admitted)
                .count()
        });
        assert_eq!(admitted, 3);
        assert_eq!(jobs.running(), 3);

        let first = jobs.list()[0].id.clone();
        jobs.cancel(&first);
        jobs.cancel(&first);
        assert_eq!(jobs.running(), 2);
        assert!(jobs.start("visibility").is_some());
    }
}
