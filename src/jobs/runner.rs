//! Job registry and runner.
//!
//! The runner owns named job factories and every execution it has started.
//! Each execution runs on its own tokio task; the body itself runs on a
//! nested task so that a panic surfaces as a `JoinError` instead of taking
//! down the runner. Whatever the body does, the record always reaches a
//! terminal status.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::error::JobError;
use crate::jobs::context::JobContext;
use crate::jobs::job::{Job, JobFactory};
use crate::jobs::log::JobLog;
use crate::jobs::state::{ExecutionRecord, ExecutionStatus, ExecutionSummary};
use crate::store::JobStore;

/// Tracked execution.
struct TrackedExecution {
    record: ExecutionRecord,
    ctx: Arc<JobContext>,
    /// Holds the final record once the execution is terminal.
    done: watch::Receiver<Option<ExecutionRecord>>,
}

type ExecutionMap = Arc<RwLock<HashMap<Uuid, TrackedExecution>>>;

/// Registers jobs and runs them.
pub struct JobRunner {
    config: RunnerConfig,
    jobs: RwLock<HashMap<String, JobFactory>>,
    executions: ExecutionMap,
    store: Option<Arc<dyn JobStore>>,
}

impl JobRunner {
    /// Create a runner that keeps records in memory only.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            jobs: RwLock::new(HashMap::new()),
            executions: Arc::new(RwLock::new(HashMap::new())),
            store: None,
        }
    }

    /// Persist records and log lines to `store` as well.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a job factory under a unique name.
    pub async fn register<F>(&self, name: impl Into<String>, factory: F) -> Result<(), JobError>
    where
        F: Fn() -> Arc<dyn Job> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&name) {
            return Err(JobError::DuplicateJobName { name });
        }
        jobs.insert(name.clone(), Arc::new(factory));
        debug!("Registered job: {}", name);
        Ok(())
    }

    /// Names of all registered jobs, sorted.
    pub async fn registered_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a run of `name` on behalf of `actor`. Returns as soon as the
    /// body has been launched.
    pub async fn start(&self, name: &str, actor: &str) -> Result<Uuid, JobError> {
        let factory = self
            .jobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| JobError::UnknownJob {
                name: name.to_string(),
            })?;

        let mut record = ExecutionRecord::new(name, actor);
        let id = record.id;

        let mut log = JobLog::new(id).with_max_lines(self.config.max_log_lines);
        if let Some(ref store) = self.store {
            log = log.with_store(Arc::clone(store));
        }
        record
            .transition_to(ExecutionStatus::Running, Some(format!("Started by {actor}")))
            .map_err(|_| JobError::InvalidTransition {
                id,
                state: record.status.to_string(),
                target: ExecutionStatus::Running.to_string(),
            })?;

        let mut ctx = JobContext::new(id, name, actor, log);
        if let Some(started_at) = record.started_at {
            ctx = ctx.starting_at(started_at);
        }
        let ctx = Arc::new(ctx);

        let (done_tx, done_rx) = watch::channel(None);
        persist(self.store.as_ref(), &record).await;
        self.executions.write().await.insert(
            id,
            TrackedExecution {
                record,
                ctx: Arc::clone(&ctx),
                done: done_rx,
            },
        );

        info!(execution_id = %id, job = %name, actor = %actor, "Job started");

        let body = factory();
        let executions = Arc::clone(&self.executions);
        let store = self.store.clone();
        let retain = self.config.max_retained_executions;
        tokio::spawn(async move {
            let outcome = run_isolated(body, Arc::clone(&ctx)).await;
            let record = finish(&executions, store.as_ref(), &ctx, outcome).await;
            let _ = done_tx.send(record);
            if retain > 0 {
                prune(&executions, retain).await;
            }
        });

        Ok(id)
    }

    /// Current view of an execution, including its log so far.
    pub async fn status(&self, id: Uuid) -> Result<ExecutionRecord, JobError> {
        let (mut record, ctx) = {
            let executions = self.executions.read().await;
            let tracked = executions
                .get(&id)
                .ok_or(JobError::UnknownExecution { id })?;
            (tracked.record.clone(), Arc::clone(&tracked.ctx))
        };

        if !record.is_terminal() {
            fill_live(&mut record, &ctx).await;
        }
        Ok(record)
    }

    /// Request cooperative cancellation. A no-op for finished executions.
    pub async fn cancel(&self, id: Uuid) -> Result<(), JobError> {
        let executions = self.executions.read().await;
        let tracked = executions
            .get(&id)
            .ok_or(JobError::UnknownExecution { id })?;

        if tracked.record.is_terminal() {
            debug!(execution_id = %id, "Cancel ignored, execution already finished");
            return Ok(());
        }

        tracked.ctx.cancel();
        info!(execution_id = %id, "Cancellation requested");
        Ok(())
    }

    /// Wait until an execution is terminal and return its final record.
    pub async fn wait(&self, id: Uuid) -> Result<ExecutionRecord, JobError> {
        let mut done = {
            let executions = self.executions.read().await;
            executions
                .get(&id)
                .ok_or(JobError::UnknownExecution { id })?
                .done
                .clone()
        };

        match done.wait_for(Option::is_some).await {
            Ok(record) => record.clone().ok_or(JobError::UnknownExecution { id }),
            // The finishing task went away without publishing; report what we have.
            Err(_) => self.status(id).await,
        }
    }

    /// Summaries of all known executions, newest first.
    pub async fn list(&self) -> Vec<ExecutionSummary> {
        let tracked: Vec<(ExecutionSummary, Option<Arc<JobContext>>)> = {
            let executions = self.executions.read().await;
            executions
                .values()
                .map(|t| {
                    let live = (!t.record.is_terminal()).then(|| Arc::clone(&t.ctx));
                    (t.record.summary(), live)
                })
                .collect()
        };

        let mut summaries = Vec::with_capacity(tracked.len());
        for (mut summary, live) in tracked {
            if let Some(ctx) = live {
                summary.failure_count = ctx.failure_count().await;
            }
            summaries.push(summary);
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Drop the oldest terminal executions beyond `keep`. Returns how many
    /// were removed.
    pub async fn prune_finished(&self, keep: usize) -> usize {
        prune(&self.executions, keep).await
    }
}

/// Run the body on its own task so panics are contained.
async fn run_isolated(body: Arc<dyn Job>, ctx: Arc<JobContext>) -> Result<(), String> {
    let handle = tokio::spawn(async move { body.run(&ctx).await });
    match handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err(format!(
            "job body panicked: {}",
            panic_message(e.into_panic())
        )),
        Err(e) => Err(format!("job body aborted: {e}")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Move an execution to its terminal status and freeze its record.
async fn finish(
    executions: &ExecutionMap,
    store: Option<&Arc<dyn JobStore>>,
    ctx: &JobContext,
    outcome: Result<(), String>,
) -> Option<ExecutionRecord> {
    let id = ctx.execution_id();
    let failures = ctx.failures().await;
    let cancelled = ctx.stopped_early();

    let (status, reason, error) = match outcome {
        Err(detail) => {
            ctx.log(format!("Job failed: {detail}")).await;
            (ExecutionStatus::Failed, Some(detail.clone()), Some(detail))
        }
        Ok(()) if !failures.is_empty() => (
            ExecutionStatus::PartiallyFailed,
            Some(format!("{} per-item failure(s)", failures.len())),
            None,
        ),
        Ok(()) => (
            ExecutionStatus::Succeeded,
            cancelled.then(|| "Cancelled before completion".to_string()),
            None,
        ),
    };

    let log = ctx.log_sink().lines().await;
    let log_lines_dropped = ctx.log_sink().dropped().await;
    let commons_processed = ctx.commons_processed().await;

    let record = {
        let mut executions = executions.write().await;
        let Some(tracked) = executions.get_mut(&id) else {
            warn!(execution_id = %id, "Finished execution is no longer tracked");
            return None;
        };
        let record = &mut tracked.record;
        record.cancelled = cancelled;
        record.failure_count = failures.len();
        record.failures = failures;
        record.commons_processed = commons_processed;
        record.error = error;
        record.log = log;
        record.log_lines_dropped = log_lines_dropped;
        if let Err(e) = record.transition_to(status, reason) {
            warn!(execution_id = %id, "Could not finish execution: {}", e);
        }
        record.clone()
    };

    match record.status {
        ExecutionStatus::Failed => warn!(
            execution_id = %id,
            job = %record.job_name,
            error = record.error.as_deref().unwrap_or(""),
            "Job failed"
        ),
        status => info!(
            execution_id = %id,
            job = %record.job_name,
            status = %status,
            failures = record.failure_count,
            cancelled = record.cancelled,
            "Job finished"
        ),
    }

    persist(store, &record).await;
    Some(record)
}

/// Fill the live parts of a running execution's record.
async fn fill_live(record: &mut ExecutionRecord, ctx: &JobContext) {
    record.cancelled = ctx.is_cancelled();
    record.failures = ctx.failures().await;
    record.failure_count = record.failures.len();
    record.commons_processed = ctx.commons_processed().await;
    record.log = ctx.log_sink().lines().await;
    record.log_lines_dropped = ctx.log_sink().dropped().await;
}

async fn persist(store: Option<&Arc<dyn JobStore>>, record: &ExecutionRecord) {
    if let Some(store) = store
        && let Err(e) = store.save_execution(record).await
    {
        warn!(execution_id = %record.id, "Failed to persist execution record: {}", e);
    }
}

async fn prune(executions: &ExecutionMap, keep: usize) -> usize {
    let mut executions = executions.write().await;
    let mut finished: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = executions
        .values()
        .filter(|t| t.record.is_terminal())
        .map(|t| (t.record.id, t.record.ended_at.unwrap_or(t.record.created_at)))
        .collect();

    if finished.len() <= keep {
        return 0;
    }

    finished.sort_by_key(|(_, ended)| *ended);
    let excess = finished.len() - keep;
    for (id, _) in finished.into_iter().take(excess) {
        executions.remove(&id);
    }
    debug!("Pruned {} finished execution(s)", excess);
    excess
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{DatabaseError, Error, TickError};
    use crate::store::InMemoryStore;

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        async fn run(&self, ctx: &JobContext) -> Result<(), Error> {
            ctx.log("noop ran").await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Job for Failing {
        async fn run(&self, ctx: &JobContext) -> Result<(), Error> {
            ctx.log("about to fail").await;
            Err(TickError::ListCommons(DatabaseError::Unavailable("db down".into())).into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Job for Panicking {
        async fn run(&self, _ctx: &JobContext) -> Result<(), Error> {
            panic!("cow stampede");
        }
    }

    struct OneBadItem;

    #[async_trait]
    impl Job for OneBadItem {
        async fn run(&self, ctx: &JobContext) -> Result<(), Error> {
            ctx.record_failure("item 1", "broken").await;
            ctx.log("kept going").await;
            Ok(())
        }
    }

    /// Spins until cancelled.
    struct UntilCancelled;

    #[async_trait]
    impl Job for UntilCancelled {
        async fn run(&self, ctx: &JobContext) -> Result<(), Error> {
            while !ctx.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            ctx.mark_stopped_early();
            ctx.log("cancelled").await;
            Ok(())
        }
    }

    /// Waits for a signal, then finishes all its work regardless of any
    /// cancellation request.
    struct FinishesAnyway {
        go: tokio::sync::Notify,
    }

    #[async_trait]
    impl Job for FinishesAnyway {
        async fn run(&self, ctx: &JobContext) -> Result<(), Error> {
            self.go.notified().await;
            ctx.log("all work done").await;
            Ok(())
        }
    }

    async fn runner_with(name: &str, job: Arc<dyn Job>) -> JobRunner {
        let runner = JobRunner::new(RunnerConfig::default());
        runner.register(name, move || Arc::clone(&job)).await.unwrap();
        runner
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let runner = runner_with("noop", Arc::new(Noop)).await;
        let err = runner
            .register("noop", || Arc::new(Noop) as Arc<dyn Job>)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::DuplicateJobName { name } if name == "noop"));
        assert_eq!(runner.registered_jobs().await, vec!["noop".to_string()]);
    }

    #[tokio::test]
    async fn unknown_job_creates_no_record() {
        let runner = runner_with("noop", Arc::new(Noop)).await;
        let err = runner.start("nope", "admin").await.unwrap_err();
        assert!(matches!(err, JobError::UnknownJob { name } if name == "nope"));
        assert!(runner.list().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_execution() {
        let runner = JobRunner::new(RunnerConfig::default());
        let id = Uuid::new_v4();
        assert!(matches!(
            runner.status(id).await,
            Err(JobError::UnknownExecution { .. })
        ));
        assert!(matches!(
            runner.cancel(id).await,
            Err(JobError::UnknownExecution { .. })
        ));
    }

    #[tokio::test]
    async fn successful_run() {
        let runner = runner_with("noop", Arc::new(Noop)).await;
        let id = runner.start("noop", "admin").await.unwrap();
        let record = runner.wait(id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.actor, "admin");
        assert!(record.started_at.is_some());
        assert!(record.started_at.is_some());
        assert!(record.ended_at.is_some());
        assert!(!record.cancelled);
        assert_eq!(record.log[0].message, "noop ran");

        let transitions: Vec<_> = record.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            transitions,
            vec![ExecutionStatus::Running, ExecutionStatus::Succeeded]
        );
    }

    #[tokio::test]
    async fn body_error_marks_failed_and_logs_detail() {
        let runner = runner_with("failing", Arc::new(Failing)).await;
        let id = runner.start("failing", "admin").await.unwrap();
        let record = runner.wait(id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("db down"));
        let last = record.log.last().unwrap();
        assert!(last.message.starts_with("Job failed:"));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let runner = runner_with("panics", Arc::new(Panicking)).await;
        let id = runner.start("panics", "admin").await.unwrap();
        let record = runner.wait(id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.as_deref().unwrap().contains("cow stampede"));

        // The runner is still usable afterwards.
        let again = runner.start("panics", "admin").await.unwrap();
        assert_ne!(again, id);
    }

    #[tokio::test]
    async fn item_failures_mark_partially_failed() {
        let runner = runner_with("bad", Arc::new(OneBadItem)).await;
        let id = runner.start("bad", "admin").await.unwrap();
        let record = runner.wait(id).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::PartiallyFailed);
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.failures[0].item, "item 1");
        assert_eq!(record.log.last().unwrap().message, "kept going");
    }

    #[tokio::test]
    async fn cancel_is_cooperative() {
        let runner = runner_with("spin", Arc::new(UntilCancelled)).await;
        let id = runner.start("spin", "admin").await.unwrap();

        let running = runner.status(id).await.unwrap();
        assert_eq!(running.status, ExecutionStatus::Running);

        runner.cancel(id).await.unwrap();
        let record = runner.wait(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert!(record.cancelled);

        // Cancelling a finished execution changes nothing.
        runner.cancel(id).await.unwrap();
        assert_eq!(runner.status(id).await.unwrap().status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn late_cancel_does_not_mark_completed_run() {
        let job = Arc::new(FinishesAnyway {
            go: tokio::sync::Notify::new(),
        });
        let runner = runner_with("steady", job.clone()).await;
        let id = runner.start("steady", "admin").await.unwrap();

        runner.cancel(id).await.unwrap();
        assert!(runner.status(id).await.unwrap().cancelled);
        job.go.notify_one();

        let record = runner.wait(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert!(!record.cancelled);
        assert_eq!(record.log.last().unwrap().message, "all work done");
    }

    #[tokio::test]
    async fn each_start_builds_a_fresh_body() {
        let built = Arc::new(AtomicUsize::new(0));
        let runner = JobRunner::new(RunnerConfig::default());
        let counter = Arc::clone(&built);
        runner
            .register("noop", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(Noop) as Arc<dyn Job>
            })
            .await
            .unwrap();

        let a = runner.start("noop", "a").await.unwrap();
        let b = runner.start("noop", "b").await.unwrap();
        runner.wait(a).await.unwrap();
        runner.wait(b).await.unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn records_and_logs_are_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let runner = JobRunner::new(RunnerConfig::default()).with_store(store.clone());
        runner
            .register("noop", || Arc::new(Noop) as Arc<dyn Job>)
            .await
            .unwrap();

        let id = runner.start("noop", "admin").await.unwrap();
        runner.wait(id).await.unwrap();

        let stored = store.load_execution(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Succeeded);
        assert_eq!(stored.log[0].message, "noop ran");
    }

    #[tokio::test]
    async fn prune_keeps_newest_finished() {
        let runner = runner_with("noop", Arc::new(Noop)).await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = runner.start("noop", "admin").await.unwrap();
            runner.wait(id).await.unwrap();
            ids.push(id);
        }

        assert_eq!(runner.prune_finished(1).await, 2);
        assert!(runner.status(ids[0]).await.is_err());
        assert!(runner.status(ids[2]).await.is_ok());
    }

    #[tokio::test]
    async fn automatic_retention_does_not_break_wait() {
        let runner = JobRunner::new(RunnerConfig {
            max_retained_executions: 1,
            ..Default::default()
        });
        runner
            .register("noop", || Arc::new(Noop) as Arc<dyn Job>)
            .await
            .unwrap();

        let first = runner.start("noop", "admin").await.unwrap();
        runner.wait(first).await.unwrap();
        let second = runner.start("noop", "admin").await.unwrap();
        let record = runner.wait(second).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
    }
}
