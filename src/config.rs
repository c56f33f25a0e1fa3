//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Default cap on in-memory log lines per execution.
pub const DEFAULT_MAX_LOG_LINES: usize = 10_000;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Cron expression for the scheduled simulation tick (None = no schedule).
    pub tick_schedule: Option<String>,
    /// Run one tick immediately on startup.
    pub run_on_start: bool,
    /// Actor recorded for runs started by the binary itself.
    pub default_actor: String,
    /// Runner limits.
    pub runner: RunnerConfig,
}

/// Limits applied by the job runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum log lines kept in memory per execution (oldest dropped first).
    pub max_log_lines: usize,
    /// Terminal executions kept for status queries (0 = unlimited).
    pub max_retained_executions: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_log_lines: DEFAULT_MAX_LOG_LINES,
            max_retained_executions: 100,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/commons.db"),
            tick_schedule: None,
            run_on_start: false,
            default_actor: "system".to_string(),
            runner: RunnerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Build the config from `COMMONS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Unset keys keep their
    /// defaults; set-but-unparseable keys are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("COMMONS_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Some(schedule) = lookup("COMMONS_TICK_SCHEDULE") {
            let schedule = schedule.trim().to_string();
            if !schedule.is_empty() {
                crate::jobs::schedule::parse_schedule(&schedule)?;
                config.tick_schedule = Some(schedule);
            }
        }

        if let Some(raw) = lookup("COMMONS_RUN_ON_START") {
            config.run_on_start = parse_bool("COMMONS_RUN_ON_START", &raw)?;
        }

        if let Some(actor) = lookup("COMMONS_DEFAULT_ACTOR") {
            config.default_actor = actor;
        }

        if let Some(raw) = lookup("COMMONS_MAX_LOG_LINES") {
            config.runner.max_log_lines = parse_usize("COMMONS_MAX_LOG_LINES", &raw)?;
            if config.runner.max_log_lines == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "COMMONS_MAX_LOG_LINES".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }

        if let Some(raw) = lookup("COMMONS_MAX_RETAINED_EXECUTIONS") {
            config.runner.max_retained_executions =
                parse_usize("COMMONS_MAX_RETAINED_EXECUTIONS", &raw)?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        })
}
