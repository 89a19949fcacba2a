//! Document store boundary
//!
//! Ledgers are keyed by device id and updated with compare-and-swap on their
//! `version` field, so two writers racing on one device never lose an attempt.
//! Support tickets live in a separate collection queried by device and time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use medtrack_core::{DeviceId, SecurityLedger, StoreError, SupportTicket};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Remote document store used by the guard
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read of a device ledger
    async fn get_ledger(&self, device_id: &DeviceId) -> Result<Option<SecurityLedger>, StoreError>;

    /// Create a ledger. Fails with `AlreadyExists` if one is present.
    ///
    /// The stored version is set to 1.
    async fn create_ledger(&self, ledger: &SecurityLedger) -> Result<(), StoreError>;

    /// Replace a ledger if its stored version still equals `expected_version`.
    ///
    /// The stored version becomes `expected_version + 1`.
    async fn update_ledger(
        &self,
        ledger: &SecurityLedger,
        expected_version: u64,
    ) -> Result<(), StoreError>;

    /// Scan every ledger
    async fn list_ledgers(&self) -> Result<Vec<SecurityLedger>, StoreError>;

    async fn insert_ticket(&self, ticket: &SupportTicket) -> Result<(), StoreError>;

    /// Count tickets from `device_id` created strictly after `since`
    async fn count_tickets_since(
        &self,
        device_id: &DeviceId,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError>;
}
