//! Data-access traits consumed by the engine.
//!
//! `CommonsStore` is the game data the tick job reads and writes.
//! `JobStore` is where execution records and their log lines are made
//! durable. Each call only has to be atomic on its own; the engine never
//! asks for a transaction spanning several calls.

use async_trait::async_trait;
use uuid::Uuid;

use crate::commons::model::{Commons, ParticipantState, User};
use crate::error::DatabaseError;
use crate::jobs::log::LogLine;
use crate::jobs::state::ExecutionRecord;

/// A participant row the store holds but cannot decode.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableParticipant {
    pub commons_id: i64,
    /// `None` when even the user id could not be read.
    pub user_id: Option<i64>,
    pub reason: String,
}

/// Participants of one commons as read from a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantListing {
    pub participants: Vec<ParticipantState>,
    pub unreadable: Vec<UnreadableParticipant>,
}

/// Result of a conditional participant save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// A newer (or the same) tick was already stored; nothing was written.
    Stale,
}

/// Commons, participants and users.
#[async_trait]
pub trait CommonsStore: Send + Sync {
    /// All commons with `active = true`.
    async fn list_active_commons(&self) -> Result<Vec<Commons>, DatabaseError>;

    /// All participant records of one commons, including zero-cow ones.
    /// Rows that exist but cannot be decoded are reported in
    /// [`ParticipantListing::unreadable`] instead of failing the call.
    async fn list_participants(
        &self,
        commons_id: i64,
    ) -> Result<ParticipantListing, DatabaseError>;

    /// Look up a user. `Ok(None)` when the user does not exist.
    async fn get_user(&self, user_id: i64) -> Result<Option<User>, DatabaseError>;

    /// Overwrite an existing participant record, unless the stored record
    /// already carries the same or a newer `last_tick_at`.
    async fn save_participant(
        &self,
        state: &ParticipantState,
    ) -> Result<SaveOutcome, DatabaseError>;
}

/// Durable home for execution records and their logs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Append one log line of a running execution.
    async fn append_log(&self, execution_id: Uuid, line: &LogLine) -> Result<(), DatabaseError>;

    /// Insert or replace an execution record (logs excluded).
    async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), DatabaseError>;

    /// Load an execution record together with its stored log lines.
    async fn load_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, DatabaseError>;
}
