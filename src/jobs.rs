//! Background jobs with a channel-fed log and an observable terminal status.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub type JobId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    FinishedSuccessfully,
    FinishedWithError(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

/// Sending half of a job's log, handed to the running task.
#[derive(Debug, Clone)]
pub struct JobLog {
    id: JobId,
    tx: mpsc::UnboundedSender<String>,
}

impl JobLog {
    pub fn line(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "bundle_import", event = "job_log", job_id = self.id, line = %line);
        // The owner may have dropped every handle; the line is then unwanted.
        let _ = self.tx.send(line);
    }
}

struct JobShared {
    id: JobId,
    name: String,
    status: watch::Receiver<JobStatus>,
    log: Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Owner-side view of a job. Clones share the same log, so a line drained
/// through one clone is gone for the others.
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("status", &self.status())
            .finish()
    }
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn status(&self) -> JobStatus {
        self.shared.status.borrow().clone()
    }

    /// Takes every log line written so far.
    pub fn drain_log(&self) -> Vec<String> {
        let mut rx = self
            .shared
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Resolves once the job has finished. A task that dies without
    /// reporting (a panic) counts as failed.
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.shared.status.clone();
        if let Ok(status) = rx.wait_for(JobStatus::is_finished).await {
            return status.clone();
        }
        let last = rx.borrow().clone();
        if last.is_finished() {
            last
        } else {
            JobStatus::FinishedWithError("job ended without reporting a status".into())
        }
    }
}

/// Runs named tasks on the tokio runtime and keeps their handles by id.
#[derive(Default)]
pub struct JobPool {
    next_id: AtomicU64,
    jobs: Mutex<BTreeMap<JobId, JobHandle>>,
}

impl JobPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task`. Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, name: impl Into<String>, task: F) -> JobHandle
    where
        F: FnOnce(JobLog) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let name = name.into();
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(JobStatus::InProgress);

        let handle = JobHandle {
            shared: Arc::new(JobShared {
                id,
                name: name.clone(),
                status: status_rx,
                log: Mutex::new(log_rx),
            }),
        };
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle.clone());

        info!(target: "bundle_import", event = "job_start", job_id = id, name = %name);
        let log = JobLog { id, tx: log_tx };
        tokio::spawn(async move {
            let status = match task(log).await {
                Ok(()) => {
                    info!(target: "bundle_import", event = "job_finished", job_id = id);
                    JobStatus::FinishedSuccessfully
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(
                        target: "bundle_import",
                        event = "job_failed",
                        job_id = id,
                        error = %message
                    );
                    JobStatus::FinishedWithError(message)
                }
            };
            let _ = status_tx.send(status);
        });

        handle
    }

    pub fn job(&self, id: JobId) -> Option<JobHandle> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}
