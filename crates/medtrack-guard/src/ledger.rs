//! Attempt ledger
//!
//! Appends one [`AttemptRecord`] per authentication outcome to the device's
//! ledger, trims records past the retention window, and bumps the lifetime
//! counter. Writes are compare-and-swap on the ledger version and retried on
//! conflict, so concurrent writers from one device cannot lose an attempt.
//!
//! Recording is best-effort telemetry: failures are logged, never returned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use medtrack_core::{
    AttemptRecord, Clock, DeviceId, DeviceInfoSource, EmailMode, LedgerConfig, OperationType,
    SecurityLedger, StoreError,
};

use crate::store::DocumentStore;

pub struct AttemptLedger {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    device_info: Arc<dyn DeviceInfoSource>,
    config: LedgerConfig,
}

impl AttemptLedger {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        device_info: Arc<dyn DeviceInfoSource>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            device_info,
            config,
        }
    }

    /// Record the outcome of a guarded operation. Never fails outward.
    pub async fn record_attempt(
        &self,
        device_id: &DeviceId,
        operation: OperationType,
        success: bool,
        email: Option<&str>,
    ) {
        match self.try_record(device_id, operation, success, email).await {
            Ok(ledger) => debug!(
                "Recorded {} {} for {} (total {}, retained {})",
                operation,
                if success { "success" } else { "failure" },
                device_id,
                ledger.total_attempts,
                ledger.attempts.len()
            ),
            Err(e) => error!(
                "Dropped {} attempt for {}: {}",
                operation, device_id, e
            ),
        }
    }

    /// Record an attempt and return the ledger as written
    pub async fn try_record(
        &self,
        device_id: &DeviceId,
        operation: OperationType,
        success: bool,
        email: Option<&str>,
    ) -> Result<SecurityLedger, StoreError> {
        let email = email.and_then(|e| redact_email(self.config.email_mode, e));
        let mut last_conflict = None;

        for retry in 0..=self.config.max_write_retries {
            if retry > 0 {
                warn!("Ledger write conflict for {}, retry {}", device_id, retry);
            }

            let now = self.clock.now();
            let record = AttemptRecord {
                timestamp: now,
                operation_type: operation,
                email: email.clone(),
                success,
            };

            let result = match self.store.get_ledger(device_id).await? {
                None => {
                    let mut ledger =
                        SecurityLedger::new(device_id.clone(), self.device_info.snapshot(), now);
                    self.append(&mut ledger, record, now);
                    self.store.create_ledger(&ledger).await.map(|()| {
                        ledger.version = 1;
                        ledger
                    })
                }
                Some(mut ledger) => {
                    let expected = ledger.version;
                    self.append(&mut ledger, record, now);
                    self.store
                        .update_ledger(&ledger, expected)
                        .await
                        .map(|()| {
                            ledger.version = expected + 1;
                            ledger
                        })
                }
            };

            match result {
                Ok(ledger) => return Ok(ledger),
                Err(e) if e.is_conflict() => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| StoreError::Unavailable("no write attempted".into())))
    }

    fn append(&self, ledger: &mut SecurityLedger, record: AttemptRecord, now: DateTime<Utc>) {
        ledger.attempts.push(record);
        let pruned = ledger.prune_before(now - self.config.retention());
        if pruned > 0 {
            debug!("Pruned {} expired attempts for {}", pruned, ledger.device_id);
        }
        ledger.total_attempts = ledger.total_attempts.saturating_add(1);
        ledger.device_info = self.device_info.snapshot();
        ledger.touch(now);
    }
}

/// Apply a mutation to an existing ledger with compare-and-swap retries.
///
/// Returns `Ok(None)` when the device has no ledger, or when `mutate` returns
/// `false` to signal that nothing needs writing.
pub(crate) async fn modify_ledger<F>(
    store: &dyn DocumentStore,
    device_id: &DeviceId,
    max_retries: u32,
    mut mutate: F,
) -> Result<Option<SecurityLedger>, StoreError>
where
    F: FnMut(&mut SecurityLedger) -> bool + Send,
{
    let mut last_conflict = None;

    for _ in 0..=max_retries {
        let Some(mut ledger) = store.get_ledger(device_id).await? else {
            return Ok(None);
        };
        let expected = ledger.version;
        if !mutate(&mut ledger) {
            return Ok(None);
        }

        match store.update_ledger(&ledger, expected).await {
            Ok(()) => {
                ledger.version = expected + 1;
                return Ok(Some(ledger));
            }
            Err(e) if e.is_conflict() => last_conflict = Some(e),
            Err(e) => return Err(e),
        }
    }

    Err(last_conflict.unwrap_or_else(|| StoreError::Unavailable("no write attempted".into())))
}

/// Apply the configured email retention mode
pub fn redact_email(mode: EmailMode, email: &str) -> Option<String> {
    let email = email.trim();
    if email.is_empty() {
        return None;
    }
    match mode {
        EmailMode::Plain => Some(email.to_string()),
        EmailMode::Hashed => {
            let digest = Sha256::digest(email.to_lowercase().as_bytes());
            Some(format!("sha256:{}", hex::encode(digest)))
        }
        EmailMode::Omit => None,
    }
}
