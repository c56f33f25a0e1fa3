use std::sync::Arc;

use anyhow::Context;

use commons_engine::commons::{SIMULATION_TICK_JOB, SimulationTickJob};
use commons_engine::config::EngineConfig;
use commons_engine::jobs::{Job, JobRunner, spawn_scheduled_trigger};
use commons_engine::store::{CommonsStore, JobStore, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env().context("Invalid configuration")?;

    eprintln!("🐄 Commons Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    match config.tick_schedule {
        Some(ref schedule) => eprintln!("   Tick schedule: {}", schedule),
        None => eprintln!("   Tick schedule: (none)"),
    }
    eprintln!("   Run on start: {}\n", config.run_on_start);

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    let commons_store: Arc<dyn CommonsStore> = db.clone();
    let job_store: Arc<dyn JobStore> = db;

    // ── Jobs ─────────────────────────────────────────────────────────────
    let runner = Arc::new(JobRunner::new(config.runner.clone()).with_store(job_store));
    runner
        .register(SIMULATION_TICK_JOB, move || {
            Arc::new(SimulationTickJob::standard(Arc::clone(&commons_store))) as Arc<dyn Job>
        })
        .await?;

    if config.run_on_start {
        let id = runner
            .start(SIMULATION_TICK_JOB, &config.default_actor)
            .await?;
        let record = runner.wait(id).await?;
        eprintln!(
            "Tick {} finished: {} ({} failures{})",
            record.id,
            record.status,
            record.failure_count,
            if record.cancelled { ", cancelled" } else { "" }
        );
        for line in &record.log {
            eprintln!("   {}", line);
        }
    }

    let Some(schedule) = config.tick_schedule.clone() else {
        if !config.run_on_start {
            eprintln!("Nothing to do: set COMMONS_TICK_SCHEDULE or COMMONS_RUN_ON_START=true");
        }
        return Ok(());
    };

    let trigger = spawn_scheduled_trigger(
        Arc::clone(&runner),
        SIMULATION_TICK_JOB,
        &schedule,
        config.default_actor.clone(),
    )?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    trigger.abort();

    for summary in runner.list().await {
        if !summary.status.is_terminal() {
            let _ = runner.cancel(summary.id).await;
        }
    }

    Ok(())
}
