//! SQLite Persistent Storage for Redemptions
//!
//! Provides durable storage for redemption records that survives service restarts.
//! Uses connection pooling via r2d2 for concurrent access.
//!
//! The optimistic version check is a single statement,
//! `UPDATE ... WHERE id = ? AND version = ?`, so SQLite's write lock makes it
//! an atomic compare-and-swap across processes sharing the database file.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use super::traits::{CreateOutcome, RedemptionStore, StorageError, StorageResult};
use crate::types::redemption::{LogEntry, Redemption, RedemptionDates, RedemptionStatus};

/// SQLite-backed redemption store with connection pooling
pub struct SqliteRedemptionStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteRedemptionStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|conn| conn.busy_timeout(std::time::Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS redemptions (
                id TEXT PRIMARY KEY,
                chain_name TEXT NOT NULL,
                event TEXT NOT NULL,
                attestation_payload BLOB,
                attestation_state TEXT NOT NULL DEFAULT 'pending',
                settlement_tx_hash TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                lease_expires_at INTEGER,
                version INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                attestation_fetched_at INTEGER,
                settlement_submitted_at INTEGER,
                completed_at INTEGER,
                last_activity_at INTEGER NOT NULL,
                logs TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_redemptions_status ON redemptions(status);
            CREATE INDEX IF NOT EXISTS idx_redemptions_chain_status ON redemptions(chain_name, status);
            CREATE INDEX IF NOT EXISTS idx_redemptions_created_at ON redemptions(created_at);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Convert a database row to Redemption
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<Redemption> {
        let event_json: String = row.get("event")?;
        let logs_json: String = row.get("logs")?;
        let status: String = row.get("status")?;
        let attestation_state: String = row.get("attestation_state")?;

        let logs: Vec<LogEntry> = serde_json::from_str(&logs_json).map_err(conversion_error)?;

        Ok(Redemption {
            id: row.get("id")?,
            chain_name: row.get("chain_name")?,
            event: serde_json::from_str(&event_json).map_err(conversion_error)?,
            attestation_payload: row.get("attestation_payload")?,
            attestation_state: attestation_state.parse().map_err(conversion_error)?,
            settlement_tx_hash: row.get("settlement_tx_hash")?,
            status: status.parse().map_err(conversion_error)?,
            error: row.get("error")?,
            retry_count: row.get::<_, i64>("retry_count")? as u32,
            lease_expires_at: row
                .get::<_, Option<i64>>("lease_expires_at")?
                .map(|v| v as u64),
            version: row.get::<_, i64>("version")? as u64,
            dates: RedemptionDates {
                created_at: row.get::<_, i64>("created_at")? as u64,
                attestation_fetched_at: row
                    .get::<_, Option<i64>>("attestation_fetched_at")?
                    .map(|v| v as u64),
                settlement_submitted_at: row
                    .get::<_, Option<i64>>("settlement_submitted_at")?
                    .map(|v| v as u64),
                completed_at: row.get::<_, Option<i64>>("completed_at")?.map(|v| v as u64),
                last_activity_at: row.get::<_, i64>("last_activity_at")? as u64,
            },
            logs,
        })
    }

    // Synchronous helper methods for the trait implementations

    fn create_sync(&self, record: &Redemption) -> Result<CreateOutcome, StorageError> {
        let conn = self.conn()?;

        let event_json = serde_json::to_string(&record.event)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let logs_json = serde_json::to_string(&record.logs)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let rows_affected = conn
            .execute(
                r#"
            INSERT INTO redemptions (
                id, chain_name, event, attestation_payload, attestation_state,
                settlement_tx_hash, status, error, retry_count, lease_expires_at,
                version, created_at, attestation_fetched_at, settlement_submitted_at,
                completed_at, last_activity_at, logs
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14,
                ?15, ?16, ?17
            )
            ON CONFLICT(id) DO NOTHING
            "#,
                params![
                    record.id,
                    record.chain_name,
                    event_json,
                    record.attestation_payload,
                    record.attestation_state.to_string(),
                    record.settlement_tx_hash,
                    record.status.to_string(),
                    record.error,
                    record.retry_count as i64,
                    record.lease_expires_at.map(|v| v as i64),
                    record.version as i64,
                    record.dates.created_at as i64,
                    record.dates.attestation_fetched_at.map(|v| v as i64),
                    record.dates.settlement_submitted_at.map(|v| v as i64),
                    record.dates.completed_at.map(|v| v as i64),
                    record.dates.last_activity_at as i64,
                    logs_json,
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 0 {
            return Ok(CreateOutcome::AlreadyExists);
        }

        Ok(CreateOutcome::Created)
    }

    fn update_sync(&self, record: &Redemption, expected_version: u64) -> Result<u64, StorageError> {
        let conn = self.conn()?;

        let logs_json = serde_json::to_string(&record.logs)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let next_version = expected_version + 1;

        // id, chain_name, event and created_at are immutable and never rewritten
        let rows_affected = conn
            .execute(
                r#"
            UPDATE redemptions SET
                attestation_payload = ?3,
                attestation_state = ?4,
                settlement_tx_hash = ?5,
                status = ?6,
                error = ?7,
                retry_count = ?8,
                lease_expires_at = ?9,
                version = ?10,
                attestation_fetched_at = ?11,
                settlement_submitted_at = ?12,
                completed_at = ?13,
                last_activity_at = ?14,
                logs = ?15
            WHERE id = ?1 AND version = ?2
            "#,
                params![
                    record.id,
                    expected_version as i64,
                    record.attestation_payload,
                    record.attestation_state.to_string(),
                    record.settlement_tx_hash,
                    record.status.to_string(),
                    record.error,
                    record.retry_count as i64,
                    record.lease_expires_at.map(|v| v as i64),
                    next_version as i64,
                    record.dates.attestation_fetched_at.map(|v| v as i64),
                    record.dates.settlement_submitted_at.map(|v| v as i64),
                    record.dates.completed_at.map(|v| v as i64),
                    record.dates.last_activity_at as i64,
                    logs_json,
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 1 {
            return Ok(next_version);
        }

        // Zero rows: either the record is gone or someone else moved it on
        let exists = conn
            .query_row(
                "SELECT 1 FROM redemptions WHERE id = ?1",
                params![record.id],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?
            .is_some();

        if exists {
            Err(StorageError::VersionConflict {
                id: record.id.clone(),
                expected: expected_version,
            })
        } else {
            Err(StorageError::NotFound(record.id.clone()))
        }
    }

    fn get_by_id_sync(&self, id: &str) -> Result<Option<Redemption>, StorageError> {
        let conn = self.conn()?;

        let record = conn
            .query_row(
                "SELECT * FROM redemptions WHERE id = ?1",
                params![id],
                |row| Self::row_to_record(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(record)
    }

    fn get_by_status_sync(
        &self,
        status: RedemptionStatus,
        chain_name: Option<&str>,
    ) -> Result<Vec<Redemption>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT * FROM redemptions
            WHERE status = ?1 AND (?2 IS NULL OR chain_name = ?2)
            ORDER BY created_at ASC, id ASC
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut rows = stmt
            .query(params![status.to_string(), chain_name])
            .map_err(|e| StorageError::Database(e.to_string()))?;

        // A row that fails to decode is skipped so its siblings stay reachable
        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| StorageError::Database(e.to_string()))?
        {
            match Self::row_to_record(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let id: Option<String> = row.get("id").ok();
                    warn!(
                        redemption_id = id.as_deref().unwrap_or("<unknown>"),
                        status = %status,
                        error = %e,
                        "Skipping undecodable redemption row"
                    );
                }
            }
        }

        Ok(records)
    }

    fn delete_sync(&self, id: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute("DELETE FROM redemptions WHERE id = ?1", params![id])
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows_affected > 0)
    }

    fn count_by_status_sync(
        &self,
        chain_name: Option<&str>,
    ) -> Result<HashMap<RedemptionStatus, u64>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT status, COUNT(*) FROM redemptions
            WHERE ?1 IS NULL OR chain_name = ?1
            GROUP BY status
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut counts = HashMap::new();
        let rows = stmt
            .query_map(params![chain_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| StorageError::Database(e.to_string()))?;

        for row in rows {
            let (status, count) = row.map_err(|e| StorageError::Database(e.to_string()))?;
            let status: RedemptionStatus = status.parse().map_err(StorageError::InvalidData)?;
            counts.insert(status, count as u64);
        }

        Ok(counts)
    }
}

fn conversion_error<E>(e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
}

#[async_trait]
impl RedemptionStore for SqliteRedemptionStore {
    async fn create(&self, record: &Redemption) -> StorageResult<CreateOutcome> {
        self.create_sync(record)
    }

    async fn update(&self, record: &Redemption, expected_version: u64) -> StorageResult<u64> {
        self.update_sync(record, expected_version)
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Redemption>> {
        self.get_by_id_sync(id)
    }

    async fn get_by_status(
        &self,
        status: RedemptionStatus,
        chain_name: Option<&str>,
    ) -> StorageResult<Vec<Redemption>> {
        self.get_by_status_sync(status, chain_name)
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        self.delete_sync(id)
    }

    async fn count_by_status(
        &self,
        chain_name: Option<&str>,
    ) -> StorageResult<HashMap<RedemptionStatus, u64>> {
        self.count_by_status_sync(chain_name)
    }
}
