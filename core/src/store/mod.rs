//! Persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The state machine calls store methods; it never executes SQL directly.
//!
//! Same-user serialization across connections and processes rests on
//! `compare_and_save`: a write only lands if the record still carries the
//! version the caller read. In-process waiting is `locks::KeyedLocks`.

use crate::{
    error::{StageError, StageResult},
    subscription::{RecordDefaults, SubscriptionRecord},
    types::Stage,
    withdrawal::{WithdrawalRecord, WithdrawalStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

mod memory;
mod subscription;
mod withdrawal;

pub use memory::MemoryStore;

/// Durable per-user subscription records.
pub trait SubscriptionStore: Send + Sync {
    fn get(&self, user_id: &str) -> StageResult<Option<SubscriptionRecord>>;

    /// Fetch the user's record, creating it from `defaults` if absent.
    /// Returns `(record, created)`.
    fn get_or_create(
        &self,
        user_id: &str,
        defaults: RecordDefaults,
        now: DateTime<Utc>,
    ) -> StageResult<(SubscriptionRecord, bool)>;

    /// Persist the full record in one atomic write, unconditionally.
    fn save(&self, record: &SubscriptionRecord) -> StageResult<()>;

    /// Persist the record only if the stored version still equals
    /// `record.version`; the stored version becomes `record.version + 1`.
    /// Returns false, writing nothing, when another writer got there first.
    fn compare_and_save(&self, record: &SubscriptionRecord) -> StageResult<bool>;
}

/// Withdrawal records. Written by back office tooling, read by the query service.
pub trait WithdrawalStore: Send + Sync {
    fn insert_withdrawal(&self, record: &WithdrawalRecord) -> StageResult<()>;

    fn withdrawals_for(
        &self,
        user_id: &str,
        status: WithdrawalStatus,
    ) -> StageResult<Vec<WithdrawalRecord>>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
    busy_timeout: Duration,
}

impl SqliteStore {
    pub fn open(path: &str, busy_timeout: Duration) -> StageResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(busy_timeout)?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        log::debug!("store: opened {path} (busy timeout {busy_timeout:?})");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
            busy_timeout,
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> StageResult<Self> {
        let busy_timeout = Duration::from_secs(5);
        let conn = Connection::open(":memory:")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            busy_timeout,
        })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> StageResult<Self> {
        match &self.path {
            Some(p) => Self::open(p, self.busy_timeout),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> StageResult<()> {
        self.conn()?
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    /// A panic while holding the connection leaves it poisoned; report
    /// that as a transient failure rather than propagating the panic.
    fn conn(&self) -> StageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StageError::unavailable("connection lock poisoned"))
    }
}

fn parse_stage(idx: usize, raw: i64) -> rusqlite::Result<Stage> {
    Stage::try_from(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, Box::new(e))
    })
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
