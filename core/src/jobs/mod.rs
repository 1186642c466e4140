//! In-memory registry of asynchronous operations.
//!
//! Every mutation and every read goes through one store-wide lock that is
//! never held across an `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::Result;
use crate::operation::OperationReport;
use crate::operation::SystemTag;
use crate::progress::Progress;
use crate::progress::ProgressSink;

mod record;

use record::Job;
pub use record::JobId;
pub use record::JobOwner;
pub use record::JobStatus;
pub use record::JobView;

const PANIC_ERROR: &str = "operation panicked";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStoreConfig {
    /// Terminal jobs idle for longer than this are dropped.
    pub retention_secs: u64,
    /// Above this many jobs the oldest are evicted, whatever their state...
    pub soft_capacity: usize,
    /// ...until this many remain.
    pub hard_floor: usize,
    pub max_log_lines: usize,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            retention_secs: 30 * 60,
            soft_capacity: 400,
            hard_floor: 300,
            max_log_lines: 2000,
        }
    }
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, Job>,
}

impl JobTable {
    fn purge(&mut self, now: DateTime<Utc>, config: &JobStoreConfig) {
        let retention = i64::try_from(config.retention_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| job.is_running() || now.signed_duration_since(job.updated_at) <= retention);

        if self.jobs.len() > config.soft_capacity {
            let mut by_age: Vec<(DateTime<Utc>, JobId)> = self
                .jobs
                .values()
                .map(|job| (job.updated_at, job.id.clone()))
                .collect();
            by_age.sort_by_key(|(updated_at, _)| *updated_at);
            let excess = self.jobs.len().saturating_sub(config.hard_floor);
            for (_, id) in by_age.into_iter().take(excess) {
                self.jobs.remove(&id);
            }
        }

        let removed = before - self.jobs.len();
        if removed > 0 {
            debug!(removed, remaining = self.jobs.len(), "purged job records");
        }
    }
}

/// Creates jobs, runs their operations on the Tokio runtime and answers polls.
///
/// Cloning is cheap; clones share the same table.
#[derive(Clone)]
pub struct JobStore {
    table: Arc<Mutex<JobTable>>,
    config: Arc<JobStoreConfig>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(JobStoreConfig::default())
    }
}

impl JobStore {
    pub fn new(config: JobStoreConfig) -> Self {
        Self {
            table: Arc::new(Mutex::new(JobTable::default())),
            config: Arc::new(config),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `run` as an independent task and return its job id immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit<F, Fut>(&self, owner: JobOwner, system: SystemTag, operation: &str, run: F) -> JobId
    where
        F: FnOnce(Progress) -> Fut + Send + 'static,
        Fut: Future<Output = Result<OperationReport>> + Send + 'static,
    {
        self.submit_observed(owner, system, operation, None, run)
    }

    /// Like [`JobStore::submit`], also copying every progress report to `observer`.
    pub fn submit_observed<F, Fut>(
        &self,
        owner: JobOwner,
        system: SystemTag,
        operation: &str,
        observer: Option<Arc<dyn ProgressSink>>,
        run: F,
    ) -> JobId
    where
        F: FnOnce(Progress) -> Fut + Send + 'static,
        Fut: Future<Output = Result<OperationReport>> + Send + 'static,
    {
        let id = JobId::generate();
        let now = Utc::now();
        let owner_id = owner.id;
        {
            let mut table = self.lock();
            table
                .jobs
                .insert(id.clone(), Job::new(id.clone(), owner, system, operation.to_string(), now));
            table.purge(now, &self.config);
        }
        info!(job_id = %id, %system, operation, owner = owner_id, "job submitted");

        let sink: Arc<dyn ProgressSink> = Arc::new(JobProgressSink {
            store: self.clone(),
            id: id.clone(),
        });
        let progress = Progress::new(sink).tee(observer);
        let store = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            let task = tokio::spawn(async move { run(progress).await });
            match task.await {
                Ok(Ok(report)) => store.complete(&job_id, report),
                Ok(Err(err)) => store.fail(&job_id, err.headline(), &err.to_string()),
                Err(join_err) => {
                    warn!(job_id = %job_id, error = %join_err, "job operation aborted");
                    store.fail(&job_id, "execution failed", PANIC_ERROR);
                }
            }
        });
        id
    }

    /// Immutable copy of the job, or `None` when it does not exist or
    /// belongs to somebody else.
    pub fn snapshot(&self, id: &JobId, owner: &JobOwner) -> Option<JobView> {
        let table = self.lock();
        table
            .jobs
            .get(id)
            .filter(|job| job.owner.id == owner.id)
            .map(Job::view)
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply_progress(&self, id: &JobId, line: &str, processed: usize, total: usize) {
        let mut table = self.lock();
        if let Some(job) = table.jobs.get_mut(id) {
            job.apply_progress(line, processed, total, self.config.max_log_lines, Utc::now());
        }
    }

    fn complete(&self, id: &JobId, report: OperationReport) {
        let mut table = self.lock();
        match table.jobs.get_mut(id) {
            Some(job) => {
                job.succeed(report, self.config.max_log_lines, Utc::now());
                info!(job_id = %id, message = %job.message, "job succeeded");
            }
            None => debug!(job_id = %id, "finished job was already purged"),
        }
    }

    fn fail(&self, id: &JobId, message: &str, error: &str) {
        let mut table = self.lock();
        match table.jobs.get_mut(id) {
            Some(job) => {
                job.fail(message, error, self.config.max_log_lines, Utc::now());
                warn!(job_id = %id, error, "job failed");
            }
            None => debug!(job_id = %id, "failed job was already purged"),
        }
    }
}

/// Routes reports from a running operation into its job record.
struct JobProgressSink {
    store: JobStore,
    id: JobId,
}

impl ProgressSink for JobProgressSink {
    fn report(&self, line: &str, processed: usize, total: usize) {
        self.store.apply_progress(&self.id, line, processed, total);
    }
}
