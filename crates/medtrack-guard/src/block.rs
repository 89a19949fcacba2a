//! Block state machine
//!
//! A device is either `Unblocked` or `Blocked { until }`. Blocks are entered
//! automatically by the evaluator and leave either by expiry (checked lazily,
//! no timer) or by an explicit admin unblock that also resets the ledger.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use medtrack_core::{Clock, DeviceId, SecurityLedger, StoreError};

use crate::ledger::modify_ledger;
use crate::store::DocumentStore;

/// Block state of a device at a point in time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum BlockState {
    Unblocked,
    Blocked { until: DateTime<Utc> },
}

impl BlockState {
    /// Derive the state from a ledger. An expired `blockedUntil` reads as unblocked.
    pub fn of(ledger: &SecurityLedger, now: DateTime<Utc>) -> Self {
        match ledger.blocked_until {
            Some(until) if until > now => BlockState::Blocked { until },
            _ => BlockState::Unblocked,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, BlockState::Blocked { .. })
    }
}

pub struct BlockStateMachine {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl BlockStateMachine {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, max_retries: u32) -> Self {
        Self {
            store,
            clock,
            max_retries,
        }
    }

    /// Transition `Unblocked -> Blocked(until)` and persist it
    pub async fn block(
        &self,
        device_id: &DeviceId,
        until: DateTime<Utc>,
    ) -> Result<Option<SecurityLedger>, StoreError> {
        let now = self.clock.now();
        let ledger = modify_ledger(self.store.as_ref(), device_id, self.max_retries, |ledger| {
            ledger.blocked_until = Some(until);
            ledger.touch(now);
            true
        })
        .await?;

        if ledger.is_some() {
            warn!("Device {} blocked until {}", device_id, until);
        }
        Ok(ledger)
    }

    /// Admin unblock: clear the block, empty the attempts, zero the counter.
    ///
    /// Returns `true` once the reset is persisted, also for a device that was
    /// not blocked. Returns `false` for unknown devices and store failures.
    pub async fn unblock_device(&self, device_id: &DeviceId) -> bool {
        let now = self.clock.now();
        let result = modify_ledger(self.store.as_ref(), device_id, self.max_retries, |ledger| {
            ledger.blocked_until = None;
            ledger.attempts.clear();
            ledger.total_attempts = 0;
            ledger.touch(now);
            true
        })
        .await;

        match result {
            Ok(Some(_)) => {
                info!("Device {} unblocked and reset by admin", device_id);
                true
            }
            Ok(None) => {
                warn!("Unblock requested for unknown device {}", device_id);
                false
            }
            Err(e) => {
                error!("Failed to unblock device {}: {}", device_id, e);
                false
            }
        }
    }
}
