//! SQLite-backed TTL persistence for calibration windows.
//!
//! One row per (device, video height, identity) triple, addressed by a
//! SHA-256 digest of the triple so raw device/identity strings never become
//! primary keys. Records expire after their TTL: an expired row is deleted
//! on the load that discovers it and the caller sees a miss, forcing a fresh
//! calibration run.
//!
//! All access is synchronous; the engine runs on a single logical thread
//! and calibration saves are rare.

use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

use facegate_core::{CalibrationKey, CalibrationStore, CalibrationWindow, StoreError};

const MS_PER_DAY: i64 = 86_400_000;

#[derive(Error, Debug)]
pub enum SqliteStoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("corrupt calibration record: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SqliteStoreError> for StoreError {
    fn from(e: SqliteStoreError) -> Self {
        StoreError::new(e)
    }
}

/// SQLite store for calibration windows with per-record TTL.
pub struct SqliteCalibrationStore {
    conn: rusqlite::Connection,
}

impl SqliteCalibrationStore {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(db_path: &Path) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(db_path)?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, SqliteStoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS calibration (
                 key TEXT PRIMARY KEY,
                 device_id TEXT NOT NULL,
                 video_height INTEGER NOT NULL,
                 identity_hash TEXT NOT NULL,
                 window TEXT NOT NULL,
                 saved_at_ms INTEGER NOT NULL,
                 ttl_days INTEGER NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    /// Remove the record for `key`, if any. Returns whether a row existed.
    pub fn delete(&self, key: &CalibrationKey) -> Result<bool, SqliteStoreError> {
        let affected = self.conn.execute(
            "DELETE FROM calibration WHERE key = ?1",
            [digest_key(key)],
        )?;
        Ok(affected > 0)
    }

    fn save_at(
        &self,
        key: &CalibrationKey,
        window: &CalibrationWindow,
        ttl_days: u32,
        now_ms: i64,
    ) -> Result<(), SqliteStoreError> {
        let json = serde_json::to_string(window)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO calibration
                 (key, device_id, video_height, identity_hash, window, saved_at_ms, ttl_days)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                digest_key(key),
                key.device_id,
                key.video_height,
                key.identity_hash,
                json,
                now_ms,
                ttl_days,
            ],
        )?;
        tracing::debug!(
            device = %key.device_id,
            video_height = key.video_height,
            ttl_days,
            "calibration window persisted"
        );
        Ok(())
    }

    fn load_at(
        &self,
        key: &CalibrationKey,
        now_ms: i64,
    ) -> Result<Option<CalibrationWindow>, SqliteStoreError> {
        let digest = digest_key(key);
        let row: Option<(String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT window, saved_at_ms, ttl_days FROM calibration WHERE key = ?1",
                [&digest],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((json, saved_at_ms, ttl_days)) = row else {
            return Ok(None);
        };

        if now_ms.saturating_sub(saved_at_ms) > ttl_days * MS_PER_DAY {
            self.conn
                .execute("DELETE FROM calibration WHERE key = ?1", [&digest])?;
            tracing::info!(
                device = %key.device_id,
                age_ms = now_ms - saved_at_ms,
                "expired calibration record dropped"
            );
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&json)?))
    }
}

impl CalibrationStore for SqliteCalibrationStore {
    fn save(
        &self,
        key: &CalibrationKey,
        window: &CalibrationWindow,
        ttl_days: u32,
    ) -> Result<(), StoreError> {
        self.save_at(key, window, ttl_days, now_wall_ms())
            .map_err(Into::into)
    }

    fn load(&self, key: &CalibrationKey) -> Result<Option<CalibrationWindow>, StoreError> {
        self.load_at(key, now_wall_ms()).map_err(Into::into)
    }
}

fn now_wall_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SHA-256 hex digest over the (device, height, identity) triple.
fn digest_key(key: &CalibrationKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.device_id.as_bytes());
    hasher.update([0]);
    hasher.update(key.video_height.to_le_bytes());
    hasher.update([0]);
    hasher.update(key.identity_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}
