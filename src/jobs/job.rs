//! Job trait: the unit of work a runner executes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::jobs::context::JobContext;

/// A job body.
///
/// Implementations hold their collaborators explicitly and do all their
/// reporting through the [`JobContext`]. Returning `Err` fails the whole
/// run; recoverable problems belong in [`JobContext::record_failure`].
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> Result<(), Error>;
}

/// Builds a fresh job body for each execution.
pub type JobFactory = Arc<dyn Fn() -> Arc<dyn Job> + Send + Sync>;
