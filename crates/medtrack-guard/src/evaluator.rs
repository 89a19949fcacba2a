//! Rate limit evaluator
//!
//! Decides whether a login or register attempt may proceed for a device:
//! 1) An active block denies everything until it expires.
//! 2) Per-operation counts in the last hour and the last 24 hours are checked
//!    against fixed limits, hourly first.
//! 3) Too many failures in the last hour, of any operation type, blocks the
//!    device for the configured duration.
//!
//! Store read errors resolve through the configured policy, fail-open by default.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use medtrack_core::{
    Clock, DeviceId, LimitsConfig, OperationType, SecurityLedger, StoreError, StoreErrorPolicy,
    DAILY_WINDOW_MINS, HOURLY_WINDOW_MINS,
};

use crate::block::BlockStateMachine;
use crate::decision::{DenialReason, LimitDecision};
use crate::store::DocumentStore;

/// Attempt counts inside the sliding windows ending at "now"
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub hourly_login: usize,
    pub hourly_register: usize,
    pub daily_login: usize,
    pub daily_register: usize,
    /// Failed attempts in the last hour, all operation types
    pub hourly_failures: usize,
}

impl WindowCounts {
    pub fn tally(ledger: &SecurityLedger, now: DateTime<Utc>) -> Self {
        let hour_ago = now - Duration::minutes(HOURLY_WINDOW_MINS);
        let day_ago = now - Duration::minutes(DAILY_WINDOW_MINS);
        let mut counts = Self::default();

        for attempt in ledger.attempts_since(day_ago) {
            let in_hour = attempt.timestamp > hour_ago;
            match attempt.operation_type {
                OperationType::Login => {
                    counts.daily_login += 1;
                    counts.hourly_login += usize::from(in_hour);
                }
                OperationType::Register => {
                    counts.daily_register += 1;
                    counts.hourly_register += usize::from(in_hour);
                }
            }
            if in_hour && !attempt.success {
                counts.hourly_failures += 1;
            }
        }
        counts
    }

    fn hourly(&self, op: OperationType) -> usize {
        match op {
            OperationType::Login => self.hourly_login,
            OperationType::Register => self.hourly_register,
        }
    }

    fn daily(&self, op: OperationType) -> usize {
        match op {
            OperationType::Login => self.daily_login,
            OperationType::Register => self.daily_register,
        }
    }
}

/// Whole minutes until `until`, rounded up
pub fn wait_minutes(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (until - now).num_milliseconds().max(0);
    (millis + 59_999) / 60_000
}

pub struct RateLimitEvaluator {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    blocks: Arc<BlockStateMachine>,
    limits: LimitsConfig,
}

impl RateLimitEvaluator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        blocks: Arc<BlockStateMachine>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            store,
            clock,
            blocks,
            limits,
        }
    }

    /// Decide whether `operation` may proceed for `device_id`
    pub async fn check_limits(
        &self,
        device_id: &DeviceId,
        operation: OperationType,
        email: Option<&str>,
    ) -> LimitDecision {
        match self.evaluate(device_id, operation).await {
            Ok(decision) => {
                if !decision.allowed {
                    debug!(
                        "Denied {} for {} (email given: {}): {:?}",
                        operation,
                        device_id,
                        email.is_some(),
                        decision.reason
                    );
                }
                decision
            }
            Err(e) => match self.limits.on_store_error {
                StoreErrorPolicy::Allow => {
                    warn!(
                        "Limit check for {} failed ({}), failing open",
                        device_id, e
                    );
                    LimitDecision::allow()
                }
                StoreErrorPolicy::Deny => {
                    warn!(
                        "Limit check for {} failed ({}), failing closed",
                        device_id, e
                    );
                    LimitDecision::deny(DenialReason::ServiceUnavailable, 1)
                }
            },
        }
    }

    async fn evaluate(
        &self,
        device_id: &DeviceId,
        operation: OperationType,
    ) -> Result<LimitDecision, StoreError> {
        let now = self.clock.now();
        let Some(ledger) = self.store.get_ledger(device_id).await? else {
            return Ok(LimitDecision::allow());
        };

        if let Some(until) = ledger.blocked_until.filter(|until| *until > now) {
            return Ok(LimitDecision::deny(
                DenialReason::TemporarilyBlocked,
                wait_minutes(until, now),
            ));
        }

        let counts = WindowCounts::tally(&ledger, now);
        let (hourly_limit, daily_limit) = match operation {
            OperationType::Login => (self.limits.hourly_login, self.limits.daily_login),
            OperationType::Register => (self.limits.hourly_register, self.limits.daily_register),
        };

        if counts.hourly(operation) >= hourly_limit {
            return Ok(LimitDecision::deny(
                DenialReason::hourly_limit(operation),
                HOURLY_WINDOW_MINS,
            ));
        }
        if counts.daily(operation) >= daily_limit {
            return Ok(LimitDecision::deny(
                DenialReason::daily_limit(operation),
                DAILY_WINDOW_MINS,
            ));
        }

        if counts.hourly_failures >= self.limits.failure_block_threshold {
            let until = now + self.limits.block_duration();
            if let Err(e) = self.blocks.block(device_id, until).await {
                // The denial stands even if the block could not be stored
                error!("Failed to persist block for {}: {}", device_id, e);
            }
            return Ok(LimitDecision::deny(
                DenialReason::TooManyFailures,
                self.limits.block_duration().num_minutes(),
            ));
        }

        Ok(LimitDecision::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use medtrack_core::{AttemptRecord, DeviceInfo, ManualClock};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn attempt(age: Duration, op: OperationType, success: bool) -> AttemptRecord {
        AttemptRecord {
            timestamp: now() - age,
            operation_type: op,
            email: None,
            success,
        }
    }

    fn evaluator(store: Arc<MemoryStore>, limits: LimitsConfig) -> RateLimitEvaluator {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now()));
        let blocks = Arc::new(BlockStateMachine::new(store.clone(), clock.clone(), 3));
        RateLimitEvaluator::new(store, clock, blocks, limits)
    }

    fn put(store: &MemoryStore, attempts: Vec<AttemptRecord>) -> DeviceId {
        let mut ledger = SecurityLedger::new("dev1".into(), DeviceInfo::default(), now());
        ledger.total_attempts = attempts.len() as u64;
        ledger.attempts = attempts;
        ledger.version = 1;
        store.put_ledger(ledger);
        "dev1".into()
    }

    #[test]
    fn test_wait_minutes_rounds_up() {
        assert_eq!(wait_minutes(now() + Duration::seconds(1), now()), 1);
        assert_eq!(wait_minutes(now() + Duration::minutes(60), now()), 60);
        assert_eq!(wait_minutes(now() + Duration::seconds(3601), now()), 61);
        assert_eq!(wait_minutes(now() - Duration::minutes(5), now()), 0);
    }

    #[test]
    fn test_tally_partitions_windows() {
        let mut ledger = SecurityLedger::new("dev".into(), DeviceInfo::default(), now());
        ledger.attempts = vec![
            attempt(Duration::minutes(10), OperationType::Login, false),
            attempt(Duration::minutes(90), OperationType::Login, true),
            attempt(Duration::minutes(5), OperationType::Register, false),
            attempt(Duration::hours(25), OperationType::Register, false),
        ];

        let counts = WindowCounts::tally(&ledger, now());
        assert_eq!(
            counts,
            WindowCounts {
                hourly_login: 1,
                hourly_register: 1,
                daily_login: 2,
                daily_register: 1,
                hourly_failures: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_device_allowed() {
        let store = Arc::new(MemoryStore::new());
        let eval = evaluator(store, LimitsConfig::default());
        let decision = eval
            .check_limits(&"new".into(), OperationType::Login, None)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_daily_register_limit() {
        let store = Arc::new(MemoryStore::new());
        let attempts = (0..3)
            .map(|i| attempt(Duration::hours(2 + i), OperationType::Register, true))
            .collect();
        let device = put(&store, attempts);
        let limits = LimitsConfig {
            daily_register: 3,
            ..LimitsConfig::default()
        };
        let eval = evaluator(store, limits);

        let decision = eval
            .check_limits(&device, OperationType::Register, None)
            .await;
        assert_eq!(
            decision,
            LimitDecision::deny(DenialReason::DailyRegisterLimit, DAILY_WINDOW_MINS)
        );

        // Login counts are independent of register counts
        let decision = eval.check_limits(&device, OperationType::Login, None).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_hourly_checked_before_daily() {
        let store = Arc::new(MemoryStore::new());
        let attempts = (0..5)
            .map(|i| attempt(Duration::minutes(i), OperationType::Login, true))
            .collect();
        let device = put(&store, attempts);
        let limits = LimitsConfig {
            hourly_login: 5,
            daily_login: 5,
            ..LimitsConfig::default()
        };
        let eval = evaluator(store, limits);

        let decision = eval.check_limits(&device, OperationType::Login, None).await;
        assert_eq!(decision.reason, Some(DenialReason::HourlyLoginLimit));
        assert_eq!(decision.wait_minutes, Some(60));
    }

    #[tokio::test]
    async fn test_failure_density_blocks_device() {
        let store = Arc::new(MemoryStore::new());
        let mut attempts: Vec<_> = (0..10)
            .map(|i| attempt(Duration::minutes(i), OperationType::Login, false))
            .collect();
        attempts.extend((0..5).map(|i| attempt(Duration::minutes(i), OperationType::Register, false)));
        let device = put(&store, attempts);
        let eval = evaluator(store.clone(), LimitsConfig::default());

        let decision = eval.check_limits(&device, OperationType::Login, None).await;
        assert_eq!(
            decision,
            LimitDecision::deny(DenialReason::TooManyFailures, 60)
        );

        let stored = store.get_ledger(&device).await.unwrap().unwrap();
        assert_eq!(stored.blocked_until, Some(now() + Duration::hours(1)));

        let decision = eval.check_limits(&device, OperationType::Register, None).await;
        assert_eq!(decision.reason, Some(DenialReason::TemporarilyBlocked));
        assert_eq!(decision.wait_minutes, Some(60));
    }

    #[tokio::test]
    async fn test_block_denies_even_if_persist_fails() {
        let store = Arc::new(MemoryStore::new());
        let attempts = (0..15)
            .map(|i| attempt(Duration::minutes(i), OperationType::Login, false))
            .collect();
        let device = put(&store, attempts);
        store.set_failing_writes(true);
        let eval = evaluator(store, LimitsConfig::default());

        let decision = eval.check_limits(&device, OperationType::Login, None).await;
        assert_eq!(decision.reason, Some(DenialReason::TooManyFailures));
    }

    #[tokio::test]
    async fn test_store_error_policy() {
        let store = Arc::new(MemoryStore::new());
        let device = put(&store, Vec::new());
        store.set_failing(true);

        let open = evaluator(store.clone(), LimitsConfig::default());
        assert!(open.check_limits(&device, OperationType::Login, None).await.allowed);

        let closed = evaluator(
            store,
            LimitsConfig {
                on_store_error: StoreErrorPolicy::Deny,
                ..LimitsConfig::default()
            },
        );
        let decision = closed.check_limits(&device, OperationType::Login, None).await;
        assert_eq!(decision.reason, Some(DenialReason::ServiceUnavailable));
    }
}
