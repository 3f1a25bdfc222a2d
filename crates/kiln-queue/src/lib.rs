//! In-memory build job queue for Kiln.
//!
//! A single shared structure coordinates the HTTP service (producer) and
//! the out-of-process worker (consumer): jobs wait in FIFO order, a claim
//! moves exactly one job to RUNNING, and an update finishes or fails it.
//! There is no persistence; a restart discards jobs by design.

use kiln_schema::Recipe;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(Uuid),
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("a FINISHED update requires an image result")]
    MissingResult,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Waiting,
    Running,
    Finished,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Waiting => "WAITING",
            JobStatus::Running => "RUNNING",
            JobStatus::Finished => "FINISHED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A finished build artifact, referenced inside the worker's
/// content-addressed store as `refs/<output-id>/<filename>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageResult {
    pub format: String,
    pub filename: String,
    pub mime_type: String,
    pub output_ref: String,
}

/// A queued build request. The recipe is immutable once enqueued; only
/// status, result, and the updated-at timestamp change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub format: String,
    pub recipe: Recipe,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ImageResult>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<Uuid>,
    jobs: HashMap<Uuid, Job>,
}

/// Multi-producer, single-consumer-by-contract job queue.
///
/// All state sits behind one mutex; claimers park on a condvar so a
/// blocking claim burns no CPU. No lock is held across subprocess work —
/// building happens entirely in the worker.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new WAITING job and wake one claimer.
    pub fn enqueue(&self, format: impl Into<String>, recipe: Recipe) -> Uuid {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now().to_rfc3339();
        let job = Job {
            id,
            format: format.into(),
            recipe,
            status: JobStatus::Waiting,
            result: None,
            created_at: now.clone(),
            updated_at: now,
        };

        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.jobs.insert(id, job);
        state.waiting.push_back(id);
        self.ready.notify_one();
        id
    }

    fn claim_locked(state: &mut QueueState) -> Option<Job> {
        let id = state.waiting.pop_front()?;
        let job = state
            .jobs
            .get_mut(&id)
            .expect("waiting id always has a job entry");
        job.status = JobStatus::Running;
        job.updated_at = chrono::Utc::now().to_rfc3339();
        Some(job.clone())
    }

    /// Claim the oldest WAITING job without blocking.
    pub fn try_claim(&self) -> Option<Job> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        Self::claim_locked(&mut state)
    }

    /// Claim the oldest WAITING job, blocking until one arrives.
    pub fn claim(&self) -> Job {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        loop {
            if let Some(job) = Self::claim_locked(&mut state) {
                return job;
            }
            state = self.ready.wait(state).expect("queue mutex poisoned");
        }
    }

    /// Claim with a deadline. Returns `None` on timeout without consuming
    /// a job, letting the caller retire cleanly.
    pub fn claim_timeout(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("queue mutex poisoned");
        loop {
            if let Some(job) = Self::claim_locked(&mut state) {
                return Some(job);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, result) = self
                .ready
                .wait_timeout(state, remaining)
                .expect("queue mutex poisoned");
            state = guard;
            if result.timed_out() {
                return Self::claim_locked(&mut state);
            }
        }
    }

    /// Move a RUNNING job to FINISHED (with a result) or FAILED.
    /// Re-posting the status a job already has is a no-op.
    pub fn update(
        &self,
        id: Uuid,
        status: JobStatus,
        result: Option<ImageResult>,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        let job = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

        if job.status == status {
            return Ok(());
        }
        match (job.status, status) {
            (JobStatus::Running, JobStatus::Finished) => {
                if result.is_none() {
                    return Err(QueueError::MissingResult);
                }
                job.status = JobStatus::Finished;
                job.result = result;
            }
            (JobStatus::Running, JobStatus::Failed) => {
                job.status = JobStatus::Failed;
            }
            (from, to) => return Err(QueueError::InvalidTransition { from, to }),
        }
        job.updated_at = chrono::Utc::now().to_rfc3339();
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Job, QueueError> {
        let state = self.state.lock().expect("queue mutex poisoned");
        state.jobs.get(&id).cloned().ok_or(QueueError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_schema::{Assembler, Pipeline, TarAssemblerOptions};
    use std::sync::Arc;

    fn recipe() -> Recipe {
        Recipe {
            build: Pipeline::default(),
            stages: Pipeline::default(),
            assembler: Assembler::Tar(TarAssemblerOptions {
                filename: "root.tar.xz".to_owned(),
            }),
        }
    }

    fn image() -> ImageResult {
        ImageResult {
            format: "tar".to_owned(),
            filename: "root.tar.xz".to_owned(),
            mime_type: "application/x-tar".to_owned(),
            output_ref: "refs/abc123/root.tar.xz".to_owned(),
        }
    }

    #[test]
    fn job_lifecycle_happy_path() {
        let queue = JobQueue::new();
        let id = queue.enqueue("tar", recipe());
        assert_eq!(queue.get(id).unwrap().status, JobStatus::Waiting);

        let job = queue.claim();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Running);

        queue.update(id, JobStatus::Finished, Some(image())).unwrap();
        let done = queue.get(id).unwrap();
        assert_eq!(done.status, JobStatus::Finished);
        assert_eq!(done.result.unwrap().output_ref, "refs/abc123/root.tar.xz");
    }

    #[test]
    fn terminal_job_rejects_conflicting_update() {
        let queue = JobQueue::new();
        let id = queue.enqueue("tar", recipe());
        queue.claim();
        queue.update(id, JobStatus::Finished, Some(image())).unwrap();
        assert!(matches!(
            queue.update(id, JobStatus::Failed, None),
            Err(QueueError::InvalidTransition {
                from: JobStatus::Finished,
                to: JobStatus::Failed,
            })
        ));
    }

    #[test]
    fn reposting_terminal_status_is_noop() {
        let queue = JobQueue::new();
        let id = queue.enqueue("tar", recipe());
        queue.claim();
        queue.update(id, JobStatus::Failed, None).unwrap();
        queue.update(id, JobStatus::Failed, None).unwrap();
        assert_eq!(queue.get(id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn waiting_job_cannot_be_finished_directly() {
        let queue = JobQueue::new();
        let id = queue.enqueue("tar", recipe());
        assert!(matches!(
            queue.update(id, JobStatus::Finished, Some(image())),
            Err(QueueError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn finished_requires_result() {
        let queue = JobQueue::new();
        let id = queue.enqueue("tar", recipe());
        queue.claim();
        assert!(matches!(
            queue.update(id, JobStatus::Finished, None),
            Err(QueueError::MissingResult)
        ));
    }

    #[test]
    fn get_unknown_job_fails() {
        let queue = JobQueue::new();
        assert!(matches!(
            queue.get(Uuid::new_v4()),
            Err(QueueError::NotFound(_))
        ));
    }

    #[test]
    fn claim_order_equals_enqueue_order() {
        let queue = JobQueue::new();
        let ids: Vec<_> = (0..5).map(|_| queue.enqueue("tar", recipe())).collect();
        let claimed: Vec<_> = (0..5).map(|_| queue.claim().id).collect();
        assert_eq!(ids, claimed);
    }

    #[test]
    fn try_claim_on_empty_queue_returns_none() {
        let queue = JobQueue::new();
        assert!(queue.try_claim().is_none());
    }

    #[test]
    fn claim_timeout_expires_without_consuming() {
        let queue = JobQueue::new();
        assert!(queue.claim_timeout(Duration::from_millis(20)).is_none());
        let id = queue.enqueue("tar", recipe());
        assert_eq!(
            queue.claim_timeout(Duration::from_millis(20)).unwrap().id,
            id
        );
    }

    #[test]
    fn blocked_claim_wakes_on_enqueue() {
        let queue = Arc::new(JobQueue::new());
        let claimer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.claim().id)
        };
        std::thread::sleep(Duration::from_millis(30));
        let id = queue.enqueue("tar", recipe());
        assert_eq!(claimer.join().unwrap(), id);
    }

    #[test]
    fn each_job_is_claimed_at_most_once() {
        let queue = Arc::new(JobQueue::new());
        const JOBS: usize = 40;
        for _ in 0..JOBS {
            queue.enqueue("tar", recipe());
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                while let Some(job) = queue.try_claim() {
                    claimed.push(job.id);
                }
                claimed
            }));
        }

        let mut all: Vec<Uuid> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), JOBS);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), JOBS, "no job was delivered twice");
    }

    #[test]
    fn job_serializes_with_screaming_status() {
        let queue = JobQueue::new();
        let id = queue.enqueue("tar", recipe());
        let json = serde_json::to_value(queue.get(id).unwrap()).unwrap();
        assert_eq!(json["status"], "WAITING");
        assert_eq!(json["format"], "tar");
        assert!(json.get("result").is_none());
    }
}
