//! Suspicious device reporter
//!
//! Read-only, cross-device scan of the ledgers for admin review.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, error};

use medtrack_core::{
    Clock, ReporterConfig, SecurityLedger, StoreError, DAILY_WINDOW_MINS,
};

use crate::store::DocumentStore;

/// Aggregate view over all ledgers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustStats {
    /// Devices with a ledger
    pub tracked_devices: usize,
    /// Devices with an active block
    pub blocked_devices: usize,
}

pub struct SuspiciousDeviceReporter {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: ReporterConfig,
}

impl SuspiciousDeviceReporter {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: ReporterConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Ledgers flagged for review, most recently active first.
    ///
    /// Store errors yield an empty list.
    pub async fn get_suspicious_devices(&self) -> Vec<SecurityLedger> {
        match self.store.list_ledgers().await {
            Ok(ledgers) => {
                let mut flagged: Vec<_> = ledgers
                    .into_iter()
                    .filter(|l| self.is_suspicious(l))
                    .collect();
                flagged.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                debug!("Suspicious device scan flagged {} devices", flagged.len());
                flagged
            }
            Err(e) => {
                error!("Suspicious device scan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Recent failures OR a high lifetime count
    pub fn is_suspicious(&self, ledger: &SecurityLedger) -> bool {
        let day_ago = self.clock.now() - Duration::minutes(DAILY_WINDOW_MINS);
        ledger.failures_since(day_ago) >= self.config.min_recent_failures
            || ledger.total_attempts >= self.config.min_total_attempts
    }

    pub async fn stats(&self) -> Result<TrustStats, StoreError> {
        let now = self.clock.now();
        let ledgers = self.store.list_ledgers().await?;
        Ok(TrustStats {
            tracked_devices: ledgers.len(),
            blocked_devices: ledgers.iter().filter(|l| l.is_blocked_at(now)).count(),
        })
    }
}
