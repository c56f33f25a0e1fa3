//! In-memory store.
//!
//! Implements both store traits over plain maps. Used by tests and demos;
//! supports injecting save and listing failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::commons::model::{Commons, ParticipantState, User};
use crate::error::DatabaseError;
use crate::jobs::log::LogLine;
use crate::jobs::state::ExecutionRecord;
use crate::store::traits::{
    CommonsStore, JobStore, ParticipantListing, SaveOutcome, UnreadableParticipant,
};

#[derive(Default)]
struct Tables {
    commons: BTreeMap<i64, Commons>,
    participants: BTreeMap<(i64, i64), ParticipantState>,
    unreadable: Vec<UnreadableParticipant>,
    users: HashMap<i64, User>,
    executions: HashMap<Uuid, ExecutionRecord>,
    logs: HashMap<Uuid, Vec<LogLine>>,
}

/// Map-backed store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    failing_saves: RwLock<HashSet<(i64, i64)>>,
    failing_listing: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a commons.
    pub fn put_commons(&self, commons: Commons) {
        self.write().commons.insert(commons.id, commons);
    }

    /// Insert or replace a user.
    pub fn put_user(&self, user: User) {
        self.write().users.insert(user.id, user);
    }

    /// Insert or replace a participant record.
    pub fn put_participant(&self, state: ParticipantState) {
        self.write().participants.insert(state.key(), state);
    }

    /// Add a participant row that listing reports as undecodable.
    pub fn put_unreadable(
        &self,
        commons_id: i64,
        user_id: Option<i64>,
        reason: impl Into<String>,
    ) {
        self.write().unreadable.push(UnreadableParticipant {
            commons_id,
            user_id,
            reason: reason.into(),
        });
    }

    /// Make every save of this participant fail.
    pub fn fail_saves_for(&self, commons_id: i64, user_id: i64) {
        self.failing_saves
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((commons_id, user_id));
    }

    /// Make commons and participant listing fail.
    pub fn fail_listing(&self, failing: bool) {
        self.failing_listing.store(failing, Ordering::SeqCst);
    }

    /// Current participant record.
    pub async fn participant(&self, commons_id: i64, user_id: i64) -> Option<ParticipantState> {
        self.read().participants.get(&(commons_id, user_id)).cloned()
    }

    /// Number of participant saves that wrote a record.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Log lines stored for an execution.
    pub async fn log_lines(&self, execution_id: Uuid) -> Vec<LogLine> {
        self.read()
            .logs
            .get(&execution_id)
            .cloned()
            .unwrap_or_default()
    }

    fn check_listing(&self) -> Result<(), DatabaseError> {
        if self.failing_listing.load(Ordering::SeqCst) {
            return Err(DatabaseError::Unavailable("listing disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CommonsStore for InMemoryStore {
    async fn list_active_commons(&self) -> Result<Vec<Commons>, DatabaseError> {
        self.check_listing()?;
        Ok(self
            .read()
            .commons
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }

    async fn list_participants(
        &self,
        commons_id: i64,
    ) -> Result<ParticipantListing, DatabaseError> {
        self.check_listing()?;
        let tables = self.read();
        Ok(ParticipantListing {
            participants: tables
                .participants
                .range((commons_id, i64::MIN)..=(commons_id, i64::MAX))
                .map(|(_, p)| p.clone())
                .collect(),
            unreadable: tables
                .unreadable
                .iter()
                .filter(|u| u.commons_id == commons_id)
                .cloned()
                .collect(),
        })
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, DatabaseError> {
        Ok(self.read().users.get(&user_id).cloned())
    }

    async fn save_participant(
        &self,
        state: &ParticipantState,
    ) -> Result<SaveOutcome, DatabaseError> {
        let key = state.key();
        if self
            .failing_saves
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
        {
            return Err(DatabaseError::Unavailable(format!(
                "save rejected for participant {key:?}"
            )));
        }

        let mut tables = self.write();
        let Some(existing) = tables.participants.get_mut(&key) else {
            return Err(DatabaseError::NotFound {
                entity: "participant".to_string(),
                id: format!("{}/{}", key.0, key.1),
            });
        };
        // Same condition as the libSQL backend's guarded UPDATE.
        let newer = match (existing.last_tick_at, state.last_tick_at) {
            (None, _) => true,
            (Some(stored), Some(incoming)) => stored < incoming,
            (Some(_), None) => false,
        };
        if !newer {
            return Ok(SaveOutcome::Stale);
        }
        *existing = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(SaveOutcome::Saved)
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn append_log(&self, execution_id: Uuid, line: &LogLine) -> Result<(), DatabaseError> {
        self.write()
            .logs
            .entry(execution_id)
            .or_default()
            .push(line.clone());
        Ok(())
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), DatabaseError> {
        let mut stored = record.clone();
        stored.log.clear();
        self.write().executions.insert(record.id, stored);
        Ok(())
    }

    async fn load_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, DatabaseError> {
        let tables = self.read();
        Ok(tables.executions.get(&execution_id).map(|record| {
            let mut record = record.clone();
            record.log = tables.logs.get(&execution_id).cloned().unwrap_or_default();
            record
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::model::CommonsConfig;

    #[tokio::test]
    async fn lists_only_active_commons_and_their_participants() {
        let store = InMemoryStore::new();
        store.put_commons(Commons::new(1, "A", CommonsConfig::default()));
        store.put_commons(Commons::new(2, "B", CommonsConfig::default()).deactivated());
        store.put_participant(ParticipantState::new(1, 5, 1));
        store.put_participant(ParticipantState::new(2, 5, 1));
        store.put_participant(ParticipantState::new(1, 6, 0));

        let commons = store.list_active_commons().await.unwrap();
        assert_eq!(commons.len(), 1);
        assert_eq!(commons[0].id, 1);

        let listing = store.list_participants(1).await.unwrap();
        assert_eq!(
            listing.participants.iter().map(|p| p.user_id).collect::<Vec<_>>(),
            vec![5, 6]
        );
        assert!(listing.unreadable.is_empty());
    }

    #[tokio::test]
    async fn save_requires_existing_participant() {
        let store = InMemoryStore::new();
        let err = store
            .save_participant(&ParticipantState::new(1, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = InMemoryStore::new();
        store.put_participant(ParticipantState::new(1, 1, 1));
        store.fail_saves_for(1, 1);
        assert!(store.save_participant(&ParticipantState::new(1, 1, 2)).await.is_err());

        store.fail_listing(true);
        assert!(store.list_active_commons().await.is_err());
        store.fail_listing(false);
        assert!(store.list_active_commons().await.is_ok());
    }

    #[tokio::test]
    async fn unreadable_rows_are_listed_per_commons() {
        let store = InMemoryStore::new();
        store.put_participant(ParticipantState::new(1, 5, 1));
        store.put_unreadable(1, Some(6), "num_cows out of range: -4");
        store.put_unreadable(2, None, "bad row");

        let listing = store.list_participants(1).await.unwrap();
        assert_eq!(listing.participants.len(), 1);
        assert_eq!(listing.unreadable.len(), 1);
        assert_eq!(listing.unreadable[0].user_id, Some(6));
    }

    #[tokio::test]
    async fn older_tick_does_not_overwrite_newer() {
        use chrono::{TimeZone, Utc};
        use rust_decimal_macros::dec;

        let early = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        let store = InMemoryStore::new();
        store.put_participant(ParticipantState::new(1, 1, 2));

        let mut newer = ParticipantState::new(1, 1, 2);
        newer.last_tick_at = Some(late);
        assert_eq!(store.save_participant(&newer).await.unwrap(), SaveOutcome::Saved);

        let mut older = ParticipantState::new(1, 1, 2).with_wealth(dec!(5));
        older.last_tick_at = Some(early);
        assert_eq!(store.save_participant(&older).await.unwrap(), SaveOutcome::Stale);
        assert_eq!(store.save_participant(&newer).await.unwrap(), SaveOutcome::Stale);

        assert_eq!(store.participant(1, 1).await.unwrap(), newer);
        assert_eq!(store.save_count(), 1);
    }
}
