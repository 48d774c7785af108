use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use releve_core::ClassificationResult;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::service::{BatchItem, Engine};

pub type JobId = Uuid;

pub type JobResults = HashMap<String, ClassificationResult>;

/// How long finished jobs stay pollable by default.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);
type Task = Box<dyn FnOnce(&Engine, &JobControl) -> JobResults + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Point-in-time view of a job, for polling.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub done: usize,
    pub total: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
}

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    completed_at: Option<DateTime<Utc>>,
    finished: Option<Instant>,
    duration_ms: Option<u64>,
    error_message: Option<String>,
    results: JobResults,
}

impl JobState {
    fn expired(&self, retention: Duration) -> bool {
        self.status.is_finished() && self.finished.is_some_and(|at| at.elapsed() >= retention)
    }
}

/// What a running task sees of its job.
pub struct JobControl {
    cancelled: AtomicBool,
    done: AtomicUsize,
}

impl JobControl {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn advance(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }
}

struct Job {
    id: JobId,
    total: usize,
    created_at: DateTime<Utc>,
    control: JobControl,
    state: Mutex<JobState>,
    task: Mutex<Option<Task>>,
}

impl Job {
    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> JobSnapshot {
        let state = self.lock();
        JobSnapshot {
            id: self.id,
            status: state.status,
            done: self.control.done.load(Ordering::Relaxed).min(self.total),
            total: self.total,
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
            duration_ms: state.duration_ms,
            error_message: state.error_message.clone(),
        }
    }

    /// Pending → running. `false` if the job was cancelled while queued.
    fn begin(&self) -> bool {
        let mut state = self.lock();
        if state.status != JobStatus::Pending {
            return false;
        }
        state.status = JobStatus::Running;
        state.started_at = Some(Utc::now());
        state.started = Some(Instant::now());
        true
    }

    fn finish(&self, status: JobStatus, results: JobResults, error_message: Option<String>) {
        let mut state = self.lock();
        state.status = status;
        state.completed_at = Some(Utc::now());
        state.finished = Some(Instant::now());
        state.duration_ms = state.started.map(|s| s.elapsed().as_millis() as u64);
        state.error_message = error_message;
        state.results = results;
    }
}

/// Background reclassification on a fixed set of tokio workers.
pub struct JobPool {
    jobs: Arc<Mutex<HashMap<JobId, Arc<Job>>>>,
    tx: mpsc::UnboundedSender<Arc<Job>>,
    workers: Vec<JoinHandle<()>>,
    retention: Duration,
}

impl JobPool {
    /// Spawns `workers` tasks on the current tokio runtime.
    pub fn start(engine: Engine, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Arc<Job>>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|n| {
                let engine = engine.clone();
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(job) = next else { break };
                        run(&engine, job).await;
                    }
                    tracing::debug!(worker = n, "job worker stopped");
                })
            })
            .collect();
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            tx,
            workers,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Finished jobs older than `retention` are dropped whenever a new job is submitted.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a batch reclassification. Never blocks.
    pub fn submit_reclassification(&self, items: Vec<BatchItem>) -> JobId {
        let total = items.len();
        self.submit(
            total,
            Box::new(move |engine: &Engine, control: &JobControl| {
                let mut results = HashMap::with_capacity(items.len());
                for item in items {
                    if control.is_cancelled() {
                        break;
                    }
                    let result = engine.classify(&item.label, item.amount, item.description.as_deref());
                    results.insert(item.id, result);
                    control.advance();
                }
                results
            }),
        )
    }

    fn submit(&self, total: usize, task: Task) -> JobId {
        self.purge_finished(self.retention);
        let job = Arc::new(Job {
            id: Uuid::new_v4(),
            total,
            created_at: Utc::now(),
            control: JobControl {
                cancelled: AtomicBool::new(false),
                done: AtomicUsize::new(0),
            },
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                started_at: None,
                started: None,
                completed_at: None,
                finished: None,
                duration_ms: None,
                error_message: None,
                results: HashMap::new(),
            }),
            task: Mutex::new(Some(task)),
        });
        let id = job.id;
        self.jobs().insert(id, Arc::clone(&job));
        if self.tx.send(job).is_err() {
            if let Some(job) = self.jobs().get(&id) {
                job.finish(JobStatus::Failed, HashMap::new(), Some("job pool is shut down".into()));
            }
        }
        tracing::debug!(job_id = %id, total, "job queued");
        id
    }

    pub fn job_status(&self, id: JobId) -> Option<JobSnapshot> {
        self.jobs().get(&id).map(|job| job.snapshot())
    }

    /// Results so far. Complete once the job has finished.
    pub fn job_results(&self, id: JobId) -> Option<JobResults> {
        self.jobs().get(&id).map(|job| job.lock().results.clone())
    }

    /// Cancels a pending or running job. Returns `false` for unknown or finished jobs.
    pub fn cancel_job(&self, id: JobId) -> bool {
        let Some(job) = self.jobs().get(&id).cloned() else {
            return false;
        };
        let mut state = job.lock();
        match state.status {
            JobStatus::Pending => {
                job.control.cancelled.store(true, Ordering::Relaxed);
                state.status = JobStatus::Cancelled;
                state.completed_at = Some(Utc::now());
                state.finished = Some(Instant::now());
            }
            JobStatus::Running => job.control.cancelled.store(true, Ordering::Relaxed),
            _ => return false,
        }
        tracing::info!(job_id = %id, "job cancelled");
        true
    }

    /// Drops a finished job. Pending and running jobs are kept.
    pub fn forget(&self, id: JobId) -> bool {
        let mut jobs = self.jobs();
        let finished = jobs.get(&id).is_some_and(|job| job.lock().status.is_finished());
        finished && jobs.remove(&id).is_some()
    }

    /// Drops jobs that finished at least `older_than` ago; returns how many went.
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, job| !job.lock().expired(older_than));
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "finished jobs purged");
        }
        removed
    }

    /// Stops accepting work and waits for queued jobs to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn run(engine: &Engine, job: Arc<Job>) {
    if !job.begin() {
        return;
    }
    let task = job
        .task
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let Some(task) = task else {
        job.finish(JobStatus::Failed, HashMap::new(), Some("job has no task".into()));
        return;
    };

    let engine = engine.clone();
    let worker_job = Arc::clone(&job);
    let outcome = tokio::task::spawn_blocking(move || task(&engine, &worker_job.control)).await;

    match outcome {
        Ok(results) if job.control.is_cancelled() => job.finish(JobStatus::Cancelled, results, None),
        Ok(results) => {
            job.finish(JobStatus::Completed, results, None);
            tracing::info!(job_id = %job.id, total = job.total, "job completed");
        }
        Err(err) => {
            tracing::warn!(job_id = %job.id, error = %err, "job failed");
            job.finish(JobStatus::Failed, HashMap::new(), Some(err.to_string()));
        }
    }
}
