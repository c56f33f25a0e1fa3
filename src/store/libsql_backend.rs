//! libSQL backend: implements both store traits.
//!
//! Supports local file and in-memory databases. Decimals are stored as
//! text so they round-trip exactly; timestamps are fixed-width RFC 3339
//! UTC so that text comparison orders them chronologically.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commons::model::{Commons, CommonsConfig, ParticipantState, User};
use crate::error::DatabaseError;
use crate::jobs::log::LogLine;
use crate::jobs::state::{ExecutionRecord, ExecutionStatus};
use crate::store::migrations;
use crate::store::traits::{
    CommonsStore, JobStore, ParticipantListing, SaveOutcome, UnreadableParticipant,
};

const COMMONS_COLUMNS: &str = "id, name, active, carrying_capacity, cow_price, milk_price, \
     degradation_rate, recovery_rate, max_crowding_penalty, critical_health, die_off_per_tick";

const PARTICIPANT_COLUMNS: &str =
    "commons_id, user_id, num_cows, cow_health, total_wealth, last_tick_at";

const EXECUTION_COLUMNS: &str = "id, job_name, status, actor, created_at, started_at, ended_at, \
     cancelled, failure_count, failures, commons_processed, error, transitions, log_lines_dropped";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Seeding / admin ─────────────────────────────────────────────

    /// Insert or replace a commons.
    pub async fn insert_commons(&self, commons: &Commons) -> Result<(), DatabaseError> {
        let c = &commons.config;
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO commons ({COMMONS_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    commons.id,
                    commons.name.clone(),
                    i64::from(commons.active),
                    i64::from(c.carrying_capacity),
                    c.cow_price.to_string(),
                    c.milk_price.to_string(),
                    c.degradation_rate.to_string(),
                    c.recovery_rate.to_string(),
                    c.max_crowding_penalty.to_string(),
                    c.critical_health.to_string(),
                    i64::from(c.die_off_per_tick),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_commons: {e}")))?;
        debug!(commons_id = commons.id, "Commons stored");
        Ok(())
    }

    /// Soft-activate or deactivate a commons.
    pub async fn set_commons_active(&self, id: i64, active: bool) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE commons SET active = ?1 WHERE id = ?2",
                params![i64::from(active), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_commons_active: {e}")))?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "commons".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Insert or replace a user.
    pub async fn insert_user(&self, user: &User) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO users (id, full_name, email) VALUES (?1, ?2, ?3)",
                params![user.id, user.full_name.clone(), user.email.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_user: {e}")))?;
        Ok(())
    }

    /// Insert or replace a participant record.
    pub async fn insert_participant(&self, state: &ParticipantState) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO user_commons ({PARTICIPANT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    state.commons_id,
                    state.user_id,
                    i64::from(state.num_cows),
                    state.cow_health.to_string(),
                    state.total_wealth.to_string(),
                    opt_text(state.last_tick_at.map(fmt_datetime)),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_participant: {e}")))?;
        Ok(())
    }

    /// Read one participant record.
    pub async fn get_participant(
        &self,
        commons_id: i64,
        user_id: i64,
    ) -> Result<Option<ParticipantState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM user_commons \
                     WHERE commons_id = ?1 AND user_id = ?2"
                ),
                params![commons_id, user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_participant: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_participant(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_participant: {e}"))),
        }
    }

    async fn load_log_lines(&self, execution_id: Uuid) -> Result<Vec<LogLine>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT seq, at, message FROM job_log_lines WHERE execution_id = ?1 ORDER BY seq",
                params![execution_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_log_lines: {e}")))?;

        let mut lines = Vec::new();
        loop {
            let row = match rows.next().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("load_log_lines: {e}"))),
            };
            let seq: i64 = row.get(0).map_err(query_err("log seq"))?;
            let at: String = row.get(1).map_err(query_err("log at"))?;
            lines.push(LogLine {
                seq: seq.max(0) as u64,
                at: parse_datetime(&at)?,
                message: row.get(2).map_err(query_err("log message"))?,
            });
        }
        Ok(lines)
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(what: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Query(format!("{what}: {e}"))
}

fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp '{s}': {e}")))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(|s| parse_datetime(&s)).transpose()
}

fn parse_decimal(field: &str, s: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("bad decimal in {field} '{s}': {e}")))
}

fn to_u32(field: &str, value: i64) -> Result<u32, DatabaseError> {
    u32::try_from(value)
        .map_err(|_| DatabaseError::Serialization(format!("{field} out of range: {value}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(field: &str, s: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("bad json in {field}: {e}")))
}

/// Column order matches COMMONS_COLUMNS.
fn row_to_commons(row: &libsql::Row) -> Result<Commons, DatabaseError> {
    let text = |i: i32, field: &'static str| -> Result<Decimal, DatabaseError> {
        let raw: String = row.get(i).map_err(query_err(field))?;
        parse_decimal(field, &raw)
    };

    let active: i64 = row.get(2).map_err(query_err("active"))?;
    Ok(Commons {
        id: row.get(0).map_err(query_err("id"))?,
        name: row.get(1).map_err(query_err("name"))?,
        active: active != 0,
        config: CommonsConfig {
            carrying_capacity: to_u32(
                "carrying_capacity",
                row.get(3).map_err(query_err("carrying_capacity"))?,
            )?,
            cow_price: text(4, "cow_price")?,
            milk_price: text(5, "milk_price")?,
            degradation_rate: text(6, "degradation_rate")?,
            recovery_rate: text(7, "recovery_rate")?,
            max_crowding_penalty: text(8, "max_crowding_penalty")?,
            critical_health: text(9, "critical_health")?,
            die_off_per_tick: to_u32(
                "die_off_per_tick",
                row.get(10).map_err(query_err("die_off_per_tick"))?,
            )?,
        },
    })
}

/// Column order matches PARTICIPANT_COLUMNS.
fn row_to_participant(row: &libsql::Row) -> Result<ParticipantState, DatabaseError> {
    let health: String = row.get(3).map_err(query_err("cow_health"))?;
    let wealth: String = row.get(4).map_err(query_err("total_wealth"))?;
    Ok(ParticipantState {
        commons_id: row.get(0).map_err(query_err("commons_id"))?,
        user_id: row.get(1).map_err(query_err("user_id"))?,
        num_cows: to_u32("num_cows", row.get(2).map_err(query_err("num_cows"))?)?,
        cow_health: parse_decimal("cow_health", &health)?,
        total_wealth: parse_decimal("total_wealth", &wealth)?,
        last_tick_at: parse_optional_datetime(row.get(5).ok())?,
    })
}

/// Column order matches EXECUTION_COLUMNS. Logs are loaded separately.
fn row_to_execution(row: &libsql::Row) -> Result<ExecutionRecord, DatabaseError> {
    let id: String = row.get(0).map_err(query_err("id"))?;
    let status: String = row.get(2).map_err(query_err("status"))?;
    let created_at: String = row.get(4).map_err(query_err("created_at"))?;
    let cancelled: i64 = row.get(7).map_err(query_err("cancelled"))?;
    let failure_count: i64 = row.get(8).map_err(query_err("failure_count"))?;
    let failures: String = row.get(9).map_err(query_err("failures"))?;
    let commons_processed: String = row.get(10).map_err(query_err("commons_processed"))?;
    let transitions: String = row.get(12).map_err(query_err("transitions"))?;
    let dropped: i64 = row.get(13).map_err(query_err("log_lines_dropped"))?;

    Ok(ExecutionRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::Serialization(format!("bad execution id '{id}': {e}")))?,
        job_name: row.get(1).map_err(query_err("job_name"))?,
        status: ExecutionStatus::from_str(&status).map_err(DatabaseError::Serialization)?,
        actor: row.get(3).map_err(query_err("actor"))?,
        created_at: parse_datetime(&created_at)?,
        started_at: parse_optional_datetime(row.get(5).ok())?,
        ended_at: parse_optional_datetime(row.get(6).ok())?,
        cancelled: cancelled != 0,
        failure_count: failure_count.max(0) as usize,
        failures: from_json("failures", &failures)?,
        commons_processed: from_json("commons_processed", &commons_processed)?,
        error: row.get(11).ok(),
        transitions: from_json("transitions", &transitions)?,
        log: Vec::new(),
        log_lines_dropped: dropped.max(0) as u64,
    })
}

#[async_trait]
impl CommonsStore for LibSqlBackend {
    async fn list_active_commons(&self) -> Result<Vec<Commons>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {COMMONS_COLUMNS} FROM commons WHERE active = 1 ORDER BY id"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_commons: {e}")))?;

        let mut commons = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => commons.push(row_to_commons(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_active_commons: {e}"))),
            }
        }
        Ok(commons)
    }

    async fn list_participants(
        &self,
        commons_id: i64,
    ) -> Result<ParticipantListing, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM user_commons \
                     WHERE commons_id = ?1 ORDER BY user_id"
                ),
                params![commons_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_participants: {e}")))?;

        let mut listing = ParticipantListing::default();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_participant(&row) {
                    Ok(p) => listing.participants.push(p),
                    Err(e) => {
                        let user_id = row.get::<i64>(1).ok();
                        warn!(commons_id, ?user_id, "Unreadable participant row: {e}");
                        listing.unreadable.push(UnreadableParticipant {
                            commons_id,
                            user_id,
                            reason: e.to_string(),
                        });
                    }
                },
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_participants: {e}"))),
            }
        }
        Ok(listing)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, full_name, email FROM users WHERE id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(User {
                id: row.get(0).map_err(query_err("id"))?,
                full_name: row.get(1).map_err(query_err("full_name"))?,
                email: row.get(2).map_err(query_err("email"))?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn save_participant(
        &self,
        state: &ParticipantState,
    ) -> Result<SaveOutcome, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE user_commons SET num_cows = ?1, cow_health = ?2, total_wealth = ?3, \
                 last_tick_at = ?4 WHERE commons_id = ?5 AND user_id = ?6 \
                 AND (last_tick_at IS NULL OR last_tick_at < ?4)",
                params![
                    i64::from(state.num_cows),
                    state.cow_health.to_string(),
                    state.total_wealth.to_string(),
                    opt_text(state.last_tick_at.map(fmt_datetime)),
                    state.commons_id,
                    state.user_id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_participant: {e}")))?;

        if changed > 0 {
            return Ok(SaveOutcome::Saved);
        }

        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM user_commons WHERE commons_id = ?1 AND user_id = ?2",
                params![state.commons_id, state.user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_participant: {e}")))?;
        match rows.next().await {
            Ok(Some(_)) => {
                debug!(
                    commons_id = state.commons_id,
                    user_id = state.user_id,
                    "Participant already carries a newer tick"
                );
                Ok(SaveOutcome::Stale)
            }
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "participant".to_string(),
                id: format!("{}/{}", state.commons_id, state.user_id),
            }),
            Err(e) => Err(DatabaseError::Query(format!("save_participant: {e}"))),
        }
    }
}

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn append_log(&self, execution_id: Uuid, line: &LogLine) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO job_log_lines (execution_id, seq, at, message) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    execution_id.to_string(),
                    line.seq as i64,
                    fmt_datetime(line.at),
                    line.message.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_log: {e}")))?;
        Ok(())
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO job_executions ({EXECUTION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    record.id.to_string(),
                    record.job_name.clone(),
                    record.status.as_str(),
                    record.actor.clone(),
                    fmt_datetime(record.created_at),
                    opt_text(record.started_at.map(fmt_datetime)),
                    opt_text(record.ended_at.map(fmt_datetime)),
                    i64::from(record.cancelled),
                    record.failure_count as i64,
                    to_json(&record.failures)?,
                    to_json(&record.commons_processed)?,
                    opt_text(record.error.clone()),
                    to_json(&record.transitions)?,
                    record.log_lines_dropped as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_execution: {e}")))?;

        debug!(execution_id = %record.id, status = %record.status, "Execution stored");
        Ok(())
    }

    async fn load_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE id = ?1"),
                params![execution_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_execution: {e}")))?;

        let mut record = match rows.next().await {
            Ok(Some(row)) => row_to_execution(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("load_execution: {e}"))),
        };
        record.log = self.load_log_lines(execution_id).await?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn commons_roundtrip_and_deactivation() {
        let db = test_db().await;
        let config = CommonsConfig {
            carrying_capacity: 42,
            milk_price: dec!(7.25),
            ..Default::default()
        };
        db.insert_commons(&Commons::new(1, "Village Green", config.clone()))
            .await
            .unwrap();
        db.insert_commons(&Commons::new(2, "Back Forty", CommonsConfig::default()))
            .await
            .unwrap();

        let active = db.list_active_commons().await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].name, "Village Green");
        assert_eq!(active[0].config, config);

        db.set_commons_active(2, false).await.unwrap();
        let active = db.list_active_commons().await.unwrap();
        assert_eq!(active.len(), 1);

        assert!(matches!(
            db.set_commons_active(99, false).await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn participant_save_updates_existing_row() {
        let db = test_db().await;
        db.insert_commons(&Commons::new(1, "Green", CommonsConfig::default()))
            .await
            .unwrap();
        db.insert_participant(&ParticipantState::new(1, 7, 3))
            .await
            .unwrap();

        let mut state = db.get_participant(1, 7).await.unwrap().unwrap();
        state.cow_health = dec!(61.5);
        state.total_wealth = dec!(18.45);
        state.last_tick_at = Some(Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap());
        assert_eq!(db.save_participant(&state).await.unwrap(), SaveOutcome::Saved);

        let listed = db.list_participants(1).await.unwrap();
        assert_eq!(listed.participants, vec![state.clone()]);
        assert!(listed.unreadable.is_empty());

        // An older tick never rolls the record back.
        let mut older = state.clone().with_wealth(dec!(1));
        older.last_tick_at = Some(Utc.with_ymd_and_hms(2026, 2, 2, 7, 59, 59).unwrap());
        assert_eq!(db.save_participant(&older).await.unwrap(), SaveOutcome::Stale);
        assert_eq!(db.get_participant(1, 7).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn saving_missing_participant_is_not_found() {
        let db = test_db().await;
        let err = db
            .save_participant(&ParticipantState::new(1, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn users_lookup() {
        let db = test_db().await;
        db.insert_user(&User::new(3, "Ada Lovelace", "ada@example.org"))
            .await
            .unwrap();
        assert_eq!(
            db.get_user(3).await.unwrap().unwrap().full_name,
            "Ada Lovelace"
        );
        assert!(db.get_user(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_roundtrip_with_logs() {
        let db = test_db().await;
        let mut record = ExecutionRecord::new("simulation_tick", "admin");
        record.transition_to(ExecutionStatus::Running, None).unwrap();
        db.save_execution(&record).await.unwrap();

        for (seq, message) in ["one", "two"].into_iter().enumerate() {
            db.append_log(
                record.id,
                &LogLine {
                    seq: seq as u64,
                    at: Utc::now(),
                    message: message.to_string(),
                },
            )
            .await
            .unwrap();
        }

        record.commons_processed = vec![1, 2];
        record.transition_to(ExecutionStatus::Succeeded, None).unwrap();
        db.save_execution(&record).await.unwrap();

        let loaded = db.load_execution(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Succeeded);
        assert_eq!(loaded.commons_processed, vec![1, 2]);
        assert_eq!(loaded.transitions.len(), 2);
        assert_eq!(
            loaded.log.iter().map(|l| l.message.as_str()).collect::<Vec<_>>(),
            vec!["one", "two"]
        );
        assert!(db.load_execution(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_participant_is_reported() {
        let db = test_db().await;
        db.insert_commons(&Commons::new(1, "Green", CommonsConfig::default()))
            .await
            .unwrap();
        db.insert_participant(&ParticipantState::new(1, 1, 3))
            .await
            .unwrap();
        db.insert_participant(&ParticipantState::new(1, 2, 3))
            .await
            .unwrap();
        db.conn()
            .execute("UPDATE user_commons SET num_cows = -4 WHERE user_id = 2", ())
            .await
            .unwrap();

        let listing = db.list_participants(1).await.unwrap();
        assert_eq!(listing.participants.len(), 1);
        assert_eq!(listing.participants[0].user_id, 1);
        assert_eq!(listing.unreadable.len(), 1);
        assert_eq!(listing.unreadable[0].user_id, Some(2));
        assert!(listing.unreadable[0].reason.contains("num_cows"));
    }

    #[test]
    fn stored_timestamps_sort_as_text() {
        let whole = Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap();
        let fractional = whole + chrono::Duration::milliseconds(500);
        let later = Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 1).unwrap();
        assert!(fmt_datetime(whole) < fmt_datetime(fractional));
        assert!(fmt_datetime(fractional) < fmt_datetime(later));
        assert_eq!(parse_datetime(&fmt_datetime(fractional)).unwrap(), fractional);
    }

    #[tokio::test]
    async fn bad_log_row_fails_the_load_instead_of_truncating() {
        let db = test_db().await;
        let record = ExecutionRecord::new("simulation_tick", "admin");
        db.save_execution(&record).await.unwrap();
        for seq in 0..3u64 {
            db.append_log(
                record.id,
                &LogLine {
                    seq,
                    at: Utc::now(),
                    message: format!("line {seq}"),
                },
            )
            .await
            .unwrap();
        }
        db.conn()
            .execute("UPDATE job_log_lines SET at = 'garbage' WHERE seq = 1", ())
            .await
            .unwrap();

        assert!(db.load_execution(record.id).await.is_err());
    }
}
