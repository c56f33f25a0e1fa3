//! Cron-driven trigger for registered jobs.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::jobs::runner::JobRunner;

/// Parse a cron expression (seconds-first, as the `cron` crate expects).
pub fn parse_schedule(expr: &str) -> Result<Schedule, ConfigError> {
    Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: "schedule".to_string(),
        message: format!("invalid cron expression '{expr}': {e}"),
    })
}

/// Next fire time strictly after `after`.
pub fn next_fire_after(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Spawn a task that starts `job_name` on every fire of `expr`.
///
/// A fire is skipped while the execution started by the previous fire is
/// still running.
pub fn spawn_scheduled_trigger(
    runner: Arc<JobRunner>,
    job_name: impl Into<String>,
    expr: &str,
    actor: impl Into<String>,
) -> Result<JoinHandle<()>, ConfigError> {
    let schedule = parse_schedule(expr)?;
    let job_name = job_name.into();
    let actor = actor.into();
    let expr = expr.to_string();

    Ok(tokio::spawn(async move {
        let mut last: Option<Uuid> = None;

        loop {
            let now = Utc::now();
            let Some(next) = next_fire_after(&schedule, now) else {
                info!(job = %job_name, schedule = %expr, "Schedule has no upcoming fires, stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            if let Some(previous) = last
                && let Ok(record) = runner.status(previous).await
                && !record.is_terminal()
            {
                warn!(
                    job = %job_name,
                    previous = %previous,
                    "Skipping scheduled run: previous run still in progress"
                );
                continue;
            }

            match runner.start(&job_name, &actor).await {
                Ok(id) => {
                    info!(job = %job_name, execution_id = %id, "Scheduled run started");
                    last = Some(id);
                }
                Err(e) => error!(job = %job_name, "Scheduled run failed to start: {}", e),
            }
        }
    }))
}
