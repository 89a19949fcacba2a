//! In-memory document store
//!
//! Used by tests and by embedders that do not need persistence. Supports
//! fault injection so callers can exercise their store-error policies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use medtrack_core::{DeviceId, SecurityLedger, StoreError, SupportTicket};

use super::DocumentStore;

#[derive(Default)]
pub struct MemoryStore {
    ledgers: RwLock<HashMap<DeviceId, SecurityLedger>>,
    tickets: RwLock<Vec<SupportTicket>>,
    failing: AtomicBool,
    failing_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make only writes fail; reads keep working
    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    /// Insert or overwrite a ledger as-is, bypassing version checks
    pub fn put_ledger(&self, ledger: SecurityLedger) {
        self.ledgers.write().insert(ledger.device_id.clone(), ledger);
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.read().len()
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check_read()?;
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store read-only".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_ledger(&self, device_id: &DeviceId) -> Result<Option<SecurityLedger>, StoreError> {
        self.check_read()?;
        Ok(self.ledgers.read().get(device_id).cloned())
    }

    async fn create_ledger(&self, ledger: &SecurityLedger) -> Result<(), StoreError> {
        self.check_write()?;
        let mut ledgers = self.ledgers.write();
        if ledgers.contains_key(&ledger.device_id) {
            return Err(StoreError::AlreadyExists(ledger.device_id.to_string()));
        }
        let mut stored = ledger.clone();
        stored.version = 1;
        ledgers.insert(stored.device_id.clone(), stored);
        Ok(())
    }

    async fn update_ledger(
        &self,
        ledger: &SecurityLedger,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut ledgers = self.ledgers.write();
        let current = ledgers
            .get_mut(&ledger.device_id)
            .ok_or_else(|| StoreError::NotFound(ledger.device_id.to_string()))?;

        if current.version != expected_version {
            return Err(StoreError::Conflict {
                id: ledger.device_id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        *current = ledger.clone();
        current.version = expected_version + 1;
        Ok(())
    }

    async fn list_ledgers(&self) -> Result<Vec<SecurityLedger>, StoreError> {
        self.check_read()?;
        Ok(self.ledgers.read().values().cloned().collect())
    }

    async fn insert_ticket(&self, ticket: &SupportTicket) -> Result<(), StoreError> {
        self.check_write()?;
        self.tickets.write().push(ticket.clone());
        Ok(())
    }

    async fn count_tickets_since(
        &self,
        device_id: &DeviceId,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.check_read()?;
        Ok(self
            .tickets
            .read()
            .iter()
            .filter(|t| &t.device_id == device_id && t.created_at > since)
            .count())
    }
}
