//! Job context: the handle a job body works through.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::jobs::log::JobLog;
use crate::jobs::state::ItemFailure;

/// Per-execution context passed into every job body.
///
/// The body is the only writer of the log and the failure ledger; the
/// runner and status pollers only read them.
pub struct JobContext {
    execution_id: Uuid,
    job_name: String,
    actor: String,
    started_at: DateTime<Utc>,
    log: JobLog,
    cancelled: AtomicBool,
    stopped_early: AtomicBool,
    failures: RwLock<Vec<ItemFailure>>,
    commons_processed: RwLock<Vec<i64>>,
}

impl JobContext {
    pub fn new(
        execution_id: Uuid,
        job_name: impl Into<String>,
        actor: impl Into<String>,
        log: JobLog,
    ) -> Self {
        Self {
            execution_id,
            job_name: job_name.into(),
            actor: actor.into(),
            started_at: Utc::now(),
            log,
            cancelled: AtomicBool::new(false),
            stopped_early: AtomicBool::new(false),
            failures: RwLock::new(Vec::new()),
            commons_processed: RwLock::new(Vec::new()),
        }
    }

    /// Pin the run's start time, which the tick job uses as its tick
    /// timestamp.
    pub fn starting_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Context with a memory-only log, for running a body outside a runner.
    pub fn detached(job_name: impl Into<String>, actor: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self::new(id, job_name, actor, JobLog::new(id))
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn log_sink(&self) -> &JobLog {
        &self.log
    }

    /// Append a line to this execution's log.
    pub async fn log(&self, message: impl Into<String>) {
        self.log.append(message).await;
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Called by the body when it honours a cancellation request and stops
    /// before finishing its work.
    pub fn mark_stopped_early(&self) {
        self.stopped_early.store(true, Ordering::SeqCst);
    }

    /// Whether the body stopped early because of cancellation. A request
    /// that arrives after the body finished does not count.
    pub fn stopped_early(&self) -> bool {
        self.stopped_early.load(Ordering::SeqCst)
    }

    /// Record a per-item failure and log it. The run continues.
    pub async fn record_failure(&self, item: impl Into<String>, reason: impl Into<String>) {
        let failure = ItemFailure {
            item: item.into(),
            reason: reason.into(),
            at: Utc::now(),
        };
        warn!(
            execution_id = %self.execution_id,
            item = %failure.item,
            "Per-item failure: {}", failure.reason
        );
        self.log
            .append(format!("FAILED {}: {}", failure.item, failure.reason))
            .await;
        self.failures.write().await.push(failure);
    }

    pub async fn failures(&self) -> Vec<ItemFailure> {
        self.failures.read().await.clone()
    }

    pub async fn failure_count(&self) -> usize {
        self.failures.read().await.len()
    }

    /// Note that a commons was fully processed by this run.
    pub async fn mark_commons_processed(&self, commons_id: i64) {
        self.commons_processed.write().await.push(commons_id);
    }

    pub async fn commons_processed(&self) -> Vec<i64> {
        self.commons_processed.read().await.clone()
    }
}
