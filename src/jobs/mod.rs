//! Job system: registry, runner, per-run context and log.
//!
//! Core components:
//! - `log`: append-only per-execution log, tailable while running
//! - `context`: JobContext handed to every job body
//! - `state`: execution state machine (Pending → Running → terminal)
//! - `job`: the Job trait and factory type
//! - `runner`: JobRunner with registration and, start/status/cancel/wait
//! - `schedule`: cron trigger that starts jobs on a schedule

pub mod context;
pub mod job;
pub mod log;
pub mod runner;
pub mod schedule;
pub mod state;

pub use context::JobContext;
pub use job::{Job, JobFactory};
pub use log::{JobLog, LogLine};
pub use runner::JobRunner;
pub use schedule::spawn_scheduled_trigger;
pub use state::{ExecutionRecord, ExecutionStatus, ExecutionSummary, ItemFailure};
