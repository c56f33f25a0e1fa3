//! Error types for the commons engine.

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Tick error: {0}")]
    Tick(#[from] TickError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced at the runner boundary.
///
/// These are caller programming errors and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job '{name}' is not registered")]
    UnknownJob { name: String },

    #[error("Execution {id} not found")]
    UnknownExecution { id: Uuid },

    #[error("Job '{name}' is already registered")]
    DuplicateJobName { name: String },

    #[error("Execution {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },
}

/// Errors raised by a rule set for a single participant.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),
}

/// Errors raised while ticking a commons.
///
/// The participant-scoped variants are recovered inside the tick job and
/// recorded as per-item failures; only the listing variants end a run.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("User {user_id} not found for participant in commons {commons_id}")]
    UserNotFound { commons_id: i64, user_id: i64 },

    #[error("Looking up user {user_id} failed: {source}")]
    UserLookup {
        user_id: i64,
        #[source]
        source: DatabaseError,
    },

    #[error("Malformed participant (commons {commons_id}, user {user_id}): {reason}")]
    MalformedParticipant {
        commons_id: i64,
        user_id: i64,
        reason: String,
    },

    #[error("Unreadable participant record in commons {commons_id}: {reason}")]
    UnreadableParticipant { commons_id: i64, reason: String },

    #[error("Saving participant (commons {commons_id}, user {user_id}) failed: {source}")]
    SaveFailed {
        commons_id: i64,
        user_id: i64,
        #[source]
        source: DatabaseError,
    },

    #[error("Rules rejected participant (commons {commons_id}, user {user_id}): {source}")]
    Rules {
        commons_id: i64,
        user_id: i64,
        #[source]
        source: RuleError,
    },

    #[error("Cannot list active commons: {0}")]
    ListCommons(#[source] DatabaseError),

    #[error("Cannot list participants of commons {commons_id}: {source}")]
    ListParticipants {
        commons_id: i64,
        #[source]
        source: DatabaseError,
    },
}

impl TickError {
    /// Whether this error ends the whole run rather than one participant.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ListCommons(_) | Self::ListParticipants { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_listing_errors_are_fatal() {
        assert!(TickError::ListCommons(DatabaseError::Query("boom".into())).is_fatal());
        assert!(
            TickError::ListParticipants {
                commons_id: 1,
                source: DatabaseError::Query("boom".into()),
            }
            .is_fatal()
        );
        assert!(
            !TickError::UserNotFound {
                commons_id: 1,
                user_id: 2
            }
            .is_fatal()
        );
        assert!(
            !TickError::SaveFailed {
                commons_id: 1,
                user_id: 2,
                source: DatabaseError::Unavailable("down".into()),
            }
            .is_fatal()
        );
        assert!(
            !TickError::Rules {
                commons_id: 1,
                user_id: 2,
                source: RuleError::Overflow("milk income"),
            }
            .is_fatal()
        );
    }

    #[test]
    fn tick_error_wraps_into_top_level() {
        let err: Error = TickError::ListCommons(DatabaseError::Pool("gone".into())).into();
        assert!(err.to_string().contains("Cannot list active commons"));
    }
}
