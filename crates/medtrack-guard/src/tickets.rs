//! Support ticket quota guard
//!
//! Caps support ticket submissions per device in any trailing 24 hours.
//! Unlike the login evaluator this guard fails closed by default: refusing a
//! ticket while the store is down costs little, letting spam through does not.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use medtrack_core::identity::to_base36;
use medtrack_core::{
    Clock, DeviceId, StoreErrorPolicy, SupportTicket, TicketConfig, TicketSubmission,
    DAILY_WINDOW_MINS,
};

use crate::decision::{DenialReason, TicketDecision};
use crate::store::DocumentStore;

pub struct SupportTicketGuard {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: TicketConfig,
}

impl SupportTicketGuard {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: TicketConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Whether `device_id` may submit another ticket now
    pub async fn check_limit(&self, device_id: &DeviceId) -> TicketDecision {
        let since = self.clock.now() - Duration::minutes(DAILY_WINDOW_MINS);

        match self.store.count_tickets_since(device_id, since).await {
            Ok(count) if count >= self.config.daily_limit => {
                debug!(
                    "Ticket quota reached for {} ({}/{})",
                    device_id, count, self.config.daily_limit
                );
                TicketDecision::deny(DenialReason::DailyTicketLimit)
            }
            Ok(count) => TicketDecision::allow(self.config.daily_limit - count),
            Err(e) => match self.config.on_store_error {
                StoreErrorPolicy::Deny => {
                    warn!("Ticket quota check for {} failed ({}), failing closed", device_id, e);
                    TicketDecision::deny(DenialReason::ServiceUnavailable)
                }
                StoreErrorPolicy::Allow => {
                    warn!("Ticket quota check for {} failed ({}), failing open", device_id, e);
                    TicketDecision {
                        allowed: true,
                        reason: None,
                        remaining_requests: None,
                    }
                }
            },
        }
    }

    /// Store a submission for `device_id`. Returns `false` if it could not be stored.
    pub async fn record_ticket(&self, device_id: &DeviceId, submission: TicketSubmission) -> bool {
        let now = self.clock.now();
        let ticket = SupportTicket {
            id: ticket_id(now),
            device_id: device_id.clone(),
            email: submission.email,
            subject: submission.subject,
            message: submission.message,
            created_at: now,
        };

        match self.store.insert_ticket(&ticket).await {
            Ok(()) => {
                info!("Support ticket {} submitted by {}", ticket.id, device_id);
                true
            }
            Err(e) => {
                error!("Failed to store support ticket for {}: {}", device_id, e);
                false
            }
        }
    }
}

fn ticket_id(now: DateTime<Utc>) -> String {
    let mut bytes = [0u8; 12];
    match getrandom::fill(&mut bytes) {
        Ok(()) => hex::encode(bytes),
        Err(e) => {
            warn!("System RNG unavailable ({}), deriving ticket id from clock", e);
            format!(
                "{}{}",
                to_base36(u64::try_from(now.timestamp_micros()).unwrap_or(0)),
                to_base36(u64::from(std::process::id()))
            )
        }
    }
}
