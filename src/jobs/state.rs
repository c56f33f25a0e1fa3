//! Execution state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::log::LogLine;

/// Status of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Record created, body not yet launched.
    Pending,
    /// Body is running.
    Running,
    /// Body completed with no per-item failures.
    Succeeded,
    /// Body returned an error or panicked.
    Failed,
    /// Body completed but recorded at least one per-item failure.
    PartiallyFailed,
}

impl ExecutionStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: ExecutionStatus) -> bool {
        use ExecutionStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Succeeded) | (Running, Failed) | (Running, PartiallyFailed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::PartiallyFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::PartiallyFailed => "partially_failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "partially_failed" => Ok(Self::PartiallyFailed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A state transition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A recoverable failure scoped to one item of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// What failed, e.g. `commons 3 / user 12`.
    pub item: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Everything an administrator can see about one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub job_name: String,
    pub status: ExecutionStatus,
    /// Who triggered the run.
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// While running: cancellation was requested. Once terminal: the body
    /// stopped early because of it.
    pub cancelled: bool,
    pub failure_count: usize,
    pub failures: Vec<ItemFailure>,
    /// Commons the run finished processing, in order. Audit only.
    pub commons_processed: Vec<i64>,
    /// Detail of the error that failed the run.
    pub error: Option<String>,
    pub transitions: Vec<StateTransition>,
    pub log: Vec<LogLine>,
    /// Log lines evicted from memory by the line cap.
    pub log_lines_dropped: u64,
}

impl ExecutionRecord {
    /// Create a PENDING record.
    pub fn new(job_name: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            status: ExecutionStatus::Pending,
            actor: actor.into(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            cancelled: false,
            failure_count: 0,
            failures: Vec::new(),
            commons_processed: Vec::new(),
            error: None,
            transitions: Vec::new(),
            log: Vec::new(),
            log_lines_dropped: 0,
        }
    }

    /// Transition to a new state. Terminal states reject every transition.
    pub fn transition_to(
        &mut self,
        new_status: ExecutionStatus,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status, new_status
            ));
        }

        let now = Utc::now();
        self.transitions.push(StateTransition {
            from: self.status,
            to: new_status,
            timestamp: now,
            reason,
        });
        self.status = new_status;

        match new_status {
            ExecutionStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(now);
            }
            s if s.is_terminal() => {
                self.ended_at = Some(now);
            }
            _ => {}
        }

        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Lightweight view without logs and failure details.
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            id: self.id,
            job_name: self.job_name.clone(),
            status: self.status,
            actor: self.actor.clone(),
            created_at: self.created_at,
            ended_at: self.ended_at,
            cancelled: self.cancelled,
            failure_count: self.failure_count,
        }
    }
}

/// Listing entry for an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub job_name: String,
    pub status: ExecutionStatus,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub failure_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(PartiallyFailed));
    }

    #[test]
    fn state_transitions_invalid() {
        use ExecutionStatus::*;
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Running.can_transition_to(Pending));
        for terminal in [Succeeded, Failed, PartiallyFailed] {
            for target in [Pending, Running, Succeeded, Failed, PartiallyFailed] {
                assert!(!terminal.can_transition_to(target), "{terminal} -> {target}");
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::PartiallyFailed.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn record_transitions_set_timestamps() {
        let mut record = ExecutionRecord::new("simulation_tick", "admin");
        assert_eq!(record.status, ExecutionStatus::Pending);

        record.transition_to(ExecutionStatus::Running, None).unwrap();
        assert!(record.started_at.is_some());
        assert!(record.ended_at.is_none());

        record
            .transition_to(ExecutionStatus::Succeeded, Some("done".into()))
            .unwrap();
        assert!(record.ended_at.is_some());
        assert_eq!(record.transitions.len(), 2);
        assert_eq!(record.transitions[1].reason.as_deref(), Some("done"));
    }

    #[test]
    fn terminal_record_is_final() {
        let mut record = ExecutionRecord::new("simulation_tick", "admin");
        record.transition_to(ExecutionStatus::Running, None).unwrap();
        record.transition_to(ExecutionStatus::Failed, None).unwrap();
        assert!(record.transition_to(ExecutionStatus::Succeeded, None).is_err());
        assert_eq!(record.status, ExecutionStatus::Failed);
    }

    #[test]
    fn status_string_forms_agree() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::PartiallyFailed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
    }
}
