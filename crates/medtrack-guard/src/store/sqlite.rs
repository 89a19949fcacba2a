//! SQLite document store
//!
//! Ledgers are stored as JSON documents next to an integer version column that
//! the compare-and-swap update keys on.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error, info};

use medtrack_core::{DeviceId, SecurityLedger, StoreError, SupportTicket};

use super::DocumentStore;

/// SQLite storage backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledgers (
                device_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS support_tickets (
                id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                document TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_device_time
                ON support_tickets(device_id, created_at);
            "#,
        )
        .map_err(db_err)?;

        info!("Guard storage schema initialized");
        Ok(())
    }

    #[cfg(test)]
    fn ledger_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ledgers", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count as usize)
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    error!("Database error: {:?}", e);
    StoreError::Unavailable(e.to_string())
}

fn encode(ledger: &SecurityLedger) -> Result<String, StoreError> {
    serde_json::to_string(ledger).map_err(|e| StoreError::Corrupt {
        id: ledger.device_id.to_string(),
        reason: e.to_string(),
    })
}

fn decode(device_id: &str, version: i64, document: &str) -> Result<SecurityLedger, StoreError> {
    let mut ledger: SecurityLedger =
        serde_json::from_str(document).map_err(|e| StoreError::Corrupt {
            id: device_id.to_string(),
            reason: e.to_string(),
        })?;
    ledger.version = version as u64;
    Ok(ledger)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_ledger(&self, device_id: &DeviceId) -> Result<Option<SecurityLedger>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, document FROM ledgers WHERE device_id = ?1",
                params![device_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        row.map(|(version, doc)| decode(device_id.as_str(), version, &doc))
            .transpose()
    }

    async fn create_ledger(&self, ledger: &SecurityLedger) -> Result<(), StoreError> {
        let mut stored = ledger.clone();
        stored.version = 1;
        let document = encode(&stored)?;

        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO ledgers (device_id, version, updated_at, document)
                 VALUES (?1, 1, ?2, ?3)",
                params![
                    stored.device_id.as_str(),
                    stored.updated_at.timestamp_millis(),
                    document
                ],
            )
            .map_err(db_err)?;

        if inserted == 0 {
            return Err(StoreError::AlreadyExists(ledger.device_id.to_string()));
        }

        debug!("Ledger created in storage: {}", ledger.device_id);
        Ok(())
    }

    async fn update_ledger(
        &self,
        ledger: &SecurityLedger,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut stored = ledger.clone();
        stored.version = expected_version + 1;
        let document = encode(&stored)?;

        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let updated = conn
            .execute(
                "UPDATE ledgers SET version = ?1, updated_at = ?2, document = ?3
                 WHERE device_id = ?4 AND version = ?5",
                params![
                    stored.version as i64,
                    stored.updated_at.timestamp_millis(),
                    document,
                    stored.device_id.as_str(),
                    expected_version as i64
                ],
            )
            .map_err(db_err)?;

        if updated == 1 {
            return Ok(());
        }

        let actual: Option<i64> = conn
            .query_row(
                "SELECT version FROM ledgers WHERE device_id = ?1",
                params![ledger.device_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        match actual {
            Some(actual) => Err(StoreError::Conflict {
                id: ledger.device_id.to_string(),
                expected: expected_version,
                actual: actual as u64,
            }),
            None => Err(StoreError::NotFound(ledger.device_id.to_string())),
        }
    }

    async fn list_ledgers(&self) -> Result<Vec<SecurityLedger>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        let mut stmt = conn
            .prepare("SELECT device_id, version, document FROM ledgers")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err)?;

        let mut ledgers = Vec::new();
        for row in rows {
            let (device_id, version, doc) = row.map_err(db_err)?;
            ledgers.push(decode(&device_id, version, &doc)?);
        }
        Ok(ledgers)
    }

    async fn insert_ticket(&self, ticket: &SupportTicket) -> Result<(), StoreError> {
        let document = serde_json::to_string(ticket).map_err(|e| StoreError::Corrupt {
            id: ticket.id.clone(),
            reason: e.to_string(),
        })?;

        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO support_tickets (id, device_id, created_at, document)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                ticket.id,
                ticket.device_id.as_str(),
                ticket.created_at.timestamp_millis(),
                document
            ],
        )
        .map_err(db_err)?;

        debug!("Support ticket {} stored for {}", ticket.id, ticket.device_id);
        Ok(())
    }

    async fn count_tickets_since(
        &self,
        device_id: &DeviceId,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM support_tickets WHERE device_id = ?1 AND created_at > ?2",
                params![device_id.as_str(), since.timestamp_millis()],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        Ok(count as usize)
    }
}
