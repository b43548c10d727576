//! SQLite-based ledger and sync state storage
//!
//! This module holds everything the device owns locally:
//! - ledger: day-keyed accumulated values per feature
//! - feature_state: enabled flag, interval, pending flag and cycle state
//! - kv: small settings such as the last raw step-counter baseline

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{CycleState, DayKey, Feature, FeatureState, LedgerEntry, LedgerValue};
use crate::error::{Result, SyncError};

/// SQLite database for the ledger and per-feature sync state
pub struct SyncDb {
    conn: Connection,
}

impl SyncDb {
    /// Open or create the sync database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| SyncError::database(format!("Failed to open sync database: {}", e)))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| SyncError::database(format!("Failed to enable WAL: {}", e)))?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SyncError::database(format!("Failed to open in-memory database: {}", e))
        })?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS ledger (
                    feature TEXT NOT NULL,
                    day_key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (feature, day_key)
                );

                CREATE TABLE IF NOT EXISTS feature_state (
                    feature TEXT PRIMARY KEY,
                    enabled INTEGER NOT NULL DEFAULT 0,
                    interval_secs INTEGER NOT NULL,
                    pending INTEGER NOT NULL DEFAULT 0,
                    cycle_state TEXT NOT NULL DEFAULT 'idle',
                    auth_required INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    last_synced_at TEXT
                );

                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| SyncError::database(format!("Failed to run migrations: {}", e)))?;

        Ok(())
    }

    /// Run `f` inside a transaction, committing only if it succeeds
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| SyncError::database(format!("Failed to begin transaction: {}", e)))?;

        let value = f(self)?;

        tx.commit()
            .map_err(|e| SyncError::database(format!("Failed to commit transaction: {}", e)))?;
        Ok(value)
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Get the ledger entry for a feature and day
    pub fn get_ledger_entry(&self, feature: Feature, day: DayKey) -> Result<Option<LedgerEntry>> {
        self.conn
            .query_row(
                "SELECT feature, day_key, value, updated_at FROM ledger
                 WHERE feature = ? AND day_key = ?",
                params![feature.as_str(), day.to_string()],
                read_ledger_row,
            )
            .optional()
            .map_err(|e| SyncError::database(format!("Failed to get ledger entry: {}", e)))
    }

    /// Insert or replace a ledger entry
    pub fn upsert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let value = serde_json::to_string(&entry.value)
            .map_err(|e| SyncError::database(format!("Failed to serialize ledger value: {}", e)))?;

        self.conn
            .execute(
                "INSERT INTO ledger (feature, day_key, value, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (feature, day_key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![
                    entry.feature.as_str(),
                    entry.day_key.to_string(),
                    value,
                    entry.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| SyncError::database(format!("Failed to write ledger entry: {}", e)))?;

        Ok(())
    }

    /// List the most recent ledger entries for a feature, newest day first
    pub fn list_ledger_entries(&self, feature: Feature, limit: u32) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT feature, day_key, value, updated_at FROM ledger
                 WHERE feature = ?
                 ORDER BY day_key DESC
                 LIMIT ?",
            )
            .map_err(|e| SyncError::database(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![feature.as_str(), limit], read_ledger_row)
            .map_err(|e| SyncError::database(format!("Failed to query ledger: {}", e)))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| SyncError::database(e.to_string()))?);
        }
        Ok(entries)
    }

    /// Delete ledger entries for a feature, optionally only days before `before`
    pub fn delete_ledger_entries(&self, feature: Feature, before: Option<DayKey>) -> Result<u32> {
        let count = match before {
            Some(day) => self.conn.execute(
                "DELETE FROM ledger WHERE feature = ? AND day_key < ?",
                params![feature.as_str(), day.to_string()],
            ),
            None => self.conn.execute(
                "DELETE FROM ledger WHERE feature = ?",
                params![feature.as_str()],
            ),
        }
        .map_err(|e| SyncError::database(format!("Failed to clear ledger: {}", e)))?;

        Ok(count as u32)
    }

    // =========================================================================
    // Feature State
    // =========================================================================

    /// Get the sync state for a feature
    pub fn get_feature_state(&self, feature: Feature) -> Result<Option<FeatureState>> {
        self.conn
            .query_row(
                "SELECT feature, enabled, interval_secs, pending, cycle_state, auth_required,
                        last_error, last_synced_at
                 FROM feature_state
                 WHERE feature = ?",
                params![feature.as_str()],
                read_state_row,
            )
            .optional()
            .map_err(|e| SyncError::database(format!("Failed to get feature state: {}", e)))
    }

    /// Insert or replace the sync state for a feature
    pub fn upsert_feature_state(&self, state: &FeatureState) -> Result<()> {
        let interval_secs = i64::try_from(state.interval_secs).map_err(|_| {
            SyncError::invalid_param(format!(
                "Interval of {}s is too large to store",
                state.interval_secs
            ))
        })?;

        self.conn
            .execute(
                "INSERT INTO feature_state (feature, enabled, interval_secs, pending, cycle_state,
                                            auth_required, last_error, last_synced_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (feature) DO UPDATE SET
                     enabled = excluded.enabled,
                     interval_secs = excluded.interval_secs,
                     pending = excluded.pending,
                     cycle_state = excluded.cycle_state,
                     auth_required = excluded.auth_required,
                     last_error = excluded.last_error,
                     last_synced_at = excluded.last_synced_at",
                params![
                    state.feature.as_str(),
                    state.enabled,
                    interval_secs,
                    state.pending,
                    state.cycle_state.to_string(),
                    state.auth_required,
                    state.last_error,
                    state.last_synced_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| SyncError::database(format!("Failed to update feature state: {}", e)))?;

        Ok(())
    }

    /// Record the cycle state for a feature
    pub fn set_cycle_state(&self, feature: Feature, state: CycleState) -> Result<()> {
        self.conn
            .execute(
                "UPDATE feature_state SET cycle_state = ? WHERE feature = ?",
                params![state.to_string(), feature.as_str()],
            )
            .map_err(|e| SyncError::database(format!("Failed to update cycle state: {}", e)))?;

        Ok(())
    }

    /// Features whose pending flag is set
    pub fn pending_features(&self) -> Result<Vec<Feature>> {
        let mut stmt = self
            .conn
            .prepare("SELECT feature FROM feature_state WHERE pending = 1 ORDER BY feature")
            .map_err(|e| SyncError::database(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| SyncError::database(format!("Failed to query pending features: {}", e)))?;

        let mut features = Vec::new();
        for row in rows {
            let name = row.map_err(|e| SyncError::database(e.to_string()))?;
            features.push(name.parse()?);
        }
        Ok(features)
    }

    /// Recover cycles that were interrupted mid-flight (after a crash)
    ///
    /// Interrupted features go back to idle with the pending flag set so the
    /// next opportunity runs them again.
    pub fn recover_interrupted_cycles(&self) -> Result<u32> {
        let count = self
            .conn
            .execute(
                "UPDATE feature_state SET cycle_state = 'idle', pending = 1
                 WHERE cycle_state IN ('starting', 'running')",
                [],
            )
            .map_err(|e| SyncError::database(format!("Failed to recover cycles: {}", e)))?;

        Ok(count as u32)
    }

    // =========================================================================
    // Key-Value Settings
    // =========================================================================

    pub fn get_kv(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| row.get(0))
            .optional()
            .map_err(|e| SyncError::database(format!("Failed to read setting {}: {}", key, e)))
    }

    pub fn set_kv(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO kv (key, value) VALUES (?, ?)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| SyncError::database(format!("Failed to write setting {}: {}", key, e)))?;

        Ok(())
    }

    pub fn delete_kv(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?", params![key])
            .map_err(|e| SyncError::database(format!("Failed to delete setting {}: {}", key, e)))?;

        Ok(())
    }
}

fn parse_timestamp(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error(index: usize, err: SyncError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn read_ledger_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let feature: String = row.get(0)?;
    let day_key: String = row.get(1)?;
    let value: String = row.get(2)?;
    let updated_at: String = row.get(3)?;

    let value: LedgerValue = serde_json::from_str(&value)
        .map_err(|e| conversion_error(2, SyncError::Json(e)))?;

    Ok(LedgerEntry {
        feature: feature.parse().map_err(|e| conversion_error(0, e))?,
        day_key: DayKey::parse(&day_key).map_err(|e| conversion_error(1, e))?,
        value,
        updated_at: parse_timestamp(Some(updated_at)).unwrap_or_else(Utc::now),
    })
}

fn read_state_row(row: &Row<'_>) -> rusqlite::Result<FeatureState> {
    let feature: String = row.get(0)?;
    let cycle_state: String = row.get(4)?;
    let interval_secs: i64 = row.get(2)?;

    Ok(FeatureState {
        feature: feature.parse().map_err(|e| conversion_error(0, e))?,
        enabled: row.get(1)?,
        interval_secs: u64::try_from(interval_secs).map_err(|_| {
            conversion_error(
                2,
                SyncError::database(format!("negative interval {}", interval_secs)),
            )
        })?,
        pending: row.get(3)?,
        cycle_state: cycle_state.parse().map_err(|e| conversion_error(4, e))?,
        auth_required: row.get(5)?,
        last_error: row.get(6)?,
        last_synced_at: parse_timestamp(row.get(7)?),
    })
}
