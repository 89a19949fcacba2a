//! End-to-end behavior of the device trust service over the in-memory store

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::task::JoinSet;

use medtrack_core::identity::DEVICE_ID_KEY;
use medtrack_core::{
    Clock, DeviceId, DeviceInfo, GuardConfig, KeyValueStore, ManualClock, MemoryKeyValueStore,
    OperationType, SecurityLedger, StaticDeviceInfo, TicketSubmission,
};
use medtrack_guard::{DenialReason, DeviceTrustService, DocumentStore, MemoryStore};

const DEVICE: &str = "lq2x9k4abc123";

fn start() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

struct Harness {
    store: Arc<MemoryStore>,
    clock: ManualClock,
    service: Arc<DeviceTrustService>,
}

async fn harness_with(config: GuardConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(start());
    let kv = Arc::new(MemoryKeyValueStore::new());
    kv.set(DEVICE_ID_KEY, DEVICE).await.unwrap();

    let service = DeviceTrustService::new(
        store.clone(),
        kv,
        Arc::new(clock.clone()),
        Arc::new(StaticDeviceInfo(DeviceInfo {
            os_name: "ios".into(),
            os_version: "17.4".into(),
            ..DeviceInfo::default()
        })),
        &config,
    );

    Harness {
        store,
        clock,
        service: Arc::new(service),
    }
}

async fn harness() -> Harness {
    harness_with(GuardConfig::default()).await
}

impl Harness {
    async fn ledger(&self) -> SecurityLedger {
        self.store
            .get_ledger(&DeviceId::new(DEVICE))
            .await
            .unwrap()
            .expect("ledger exists")
    }
}

fn ticket() -> TicketSubmission {
    TicketSubmission {
        email: None,
        subject: "Refill reminder".into(),
        message: "Reminder shows the wrong dose".into(),
    }
}

#[tokio::test]
async fn device_id_comes_from_local_store() {
    let h = harness().await;
    assert_eq!(h.service.get_device_id().await, DeviceId::new(DEVICE));
}

#[tokio::test]
async fn total_attempts_counts_every_call_despite_pruning() {
    let h = harness().await;

    for i in 0..40 {
        h.service
            .record_attempt(OperationType::Login, i % 3 != 0, Some("user@example.com"))
            .await;
        h.clock.advance(Duration::days(1));
    }

    let ledger = h.ledger().await;
    assert_eq!(ledger.total_attempts, 40);
    assert!(ledger.attempts.len() < 40);
    assert!(ledger.updated_at >= ledger.created_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_records_are_not_lost() {
    let mut config = GuardConfig::default();
    config.ledger.max_write_retries = 64;
    let h = harness_with(config).await;

    let mut tasks = JoinSet::new();
    for i in 0..32 {
        let service = h.service.clone();
        tasks.spawn(async move {
            service
                .record_attempt(OperationType::Login, i % 2 == 0, None)
                .await;
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let ledger = h.ledger().await;
    assert_eq!(ledger.total_attempts, 32);
    assert_eq!(ledger.attempts.len(), 32);
}

#[tokio::test]
async fn no_record_older_than_retention_survives_a_write() {
    let h = harness().await;

    for _ in 0..45 {
        h.service
            .record_attempt(OperationType::Register, true, None)
            .await;

        let now = h.clock.now();
        let ledger = h.ledger().await;
        assert!(ledger
            .attempts
            .iter()
            .all(|a| a.timestamp >= now - Duration::days(30)));

        h.clock.advance(Duration::hours(20));
    }
}

#[tokio::test]
async fn fifteen_failures_block_the_device() {
    let h = harness().await;

    for _ in 0..14 {
        h.service
            .record_attempt(OperationType::Login, false, Some("victim@example.com"))
            .await;
        h.clock.advance(Duration::seconds(20));
    }
    assert!(h.service.check_security_limits(OperationType::Login, None).await.allowed);

    h.service
        .record_attempt(OperationType::Login, false, Some("victim@example.com"))
        .await;
    let decision = h
        .service
        .check_security_limits(OperationType::Login, None)
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(DenialReason::TooManyFailures));
    assert_eq!(decision.wait_minutes, Some(60));

    let blocked_until = h.ledger().await.blocked_until.expect("block persisted");
    assert_eq!(blocked_until, h.clock.now() + Duration::minutes(60));

    // Every operation is denied while the block lasts
    h.clock.advance(Duration::minutes(30));
    let decision = h
        .service
        .check_security_limits(OperationType::Register, None)
        .await;
    assert_eq!(decision.reason, Some(DenialReason::TemporarilyBlocked));
    assert_eq!(decision.wait_minutes, Some(30));

    // Expiry needs no admin action
    h.clock.advance(Duration::minutes(30));
    assert!(h.service.check_security_limits(OperationType::Login, None).await.allowed);
}

#[tokio::test]
async fn expired_block_is_ignored() {
    let h = harness().await;
    let now = h.clock.now();
    let mut ledger = SecurityLedger::new(DEVICE.into(), DeviceInfo::default(), now - Duration::days(1));
    ledger.total_attempts = 15;
    ledger.blocked_until = Some(now - Duration::minutes(1));
    ledger.version = 3;
    h.store.put_ledger(ledger);

    let decision = h
        .service
        .check_security_limits(OperationType::Login, None)
        .await;
    assert!(decision.allowed);
    // Still carries the stale timestamp: expiry is lazy
    assert!(h.ledger().await.blocked_until.is_some());
}

#[tokio::test]
async fn unblock_is_idempotent() {
    let h = harness().await;
    let device = DeviceId::new(DEVICE);
    for _ in 0..4 {
        h.service
            .record_attempt(OperationType::Login, true, None)
            .await;
    }

    assert!(h.service.unblock_device(&device).await);
    assert!(h.service.unblock_device(&device).await);

    let ledger = h.ledger().await;
    assert!(ledger.attempts.is_empty());
    assert_eq!(ledger.total_attempts, 0);
    assert_eq!(ledger.blocked_until, None);
}

#[tokio::test]
async fn unblock_lifts_an_active_block() {
    let h = harness().await;
    for _ in 0..15 {
        h.service
            .record_attempt(OperationType::Register, false, None)
            .await;
    }
    assert!(!h.service.check_security_limits(OperationType::Register, None).await.allowed);

    assert!(h.service.unblock_device(&DeviceId::new(DEVICE)).await);
    assert!(h.service.check_security_limits(OperationType::Register, None).await.allowed);
}

#[tokio::test]
async fn hourly_login_boundary() {
    let h = harness().await;

    for _ in 0..100 {
        let decision = h
            .service
            .check_security_limits(OperationType::Login, None)
            .await;
        assert!(decision.allowed);
        h.service
            .record_attempt(OperationType::Login, true, None)
            .await;
        h.clock.advance(Duration::seconds(30));
    }

    let decision = h
        .service
        .check_security_limits(OperationType::Login, None)
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(DenialReason::HourlyLoginLimit));
    assert_eq!(decision.wait_minutes, Some(60));
    assert!(decision.reason.unwrap().to_string().contains("Hourly login limit"));

    // Registration has its own counters
    assert!(h.service.check_security_limits(OperationType::Register, None).await.allowed);
}

#[tokio::test]
async fn daily_login_boundary() {
    let h = harness().await;

    // One login a minute stays under the hourly limit for 500 minutes
    for _ in 0..500 {
        let decision = h
            .service
            .check_security_limits(OperationType::Login, None)
            .await;
        assert!(decision.allowed);
        h.service
            .record_attempt(OperationType::Login, true, None)
            .await;
        h.clock.advance(Duration::minutes(1));
    }

    let decision = h
        .service
        .check_security_limits(OperationType::Login, None)
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(DenialReason::DailyLoginLimit));
    assert_eq!(decision.wait_minutes, Some(1440));

    // The oldest logins leave the 24 hour window
    h.clock.set(start() + Duration::minutes(1441));
    assert!(h.service.check_security_limits(OperationType::Login, None).await.allowed);
}

#[tokio::test]
async fn hourly_register_boundary() {
    let h = harness().await;

    for _ in 0..100 {
        let decision = h
            .service
            .check_security_limits(OperationType::Register, None)
            .await;
        assert!(decision.allowed);
        h.service
            .record_attempt(OperationType::Register, true, None)
            .await;
        h.clock.advance(Duration::seconds(30));
    }

    let decision = h
        .service
        .check_security_limits(OperationType::Register, None)
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(DenialReason::HourlyRegisterLimit));
    assert_eq!(decision.wait_minutes, Some(60));

    assert!(h.service.check_security_limits(OperationType::Login, None).await.allowed);
}

#[tokio::test]
async fn lifetime_count_alone_flags_device() {
    let h = harness().await;
    for _ in 0..3 {
        h.service
            .record_attempt(OperationType::Login, true, None)
            .await;
    }
    h.clock.advance(Duration::days(2));

    let flagged = h.service.get_suspicious_devices().await;
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].device_id, DeviceId::new(DEVICE));
    assert_eq!(flagged[0].total_attempts, 3);
}

#[tokio::test]
async fn ticket_quota_fails_closed_while_login_fails_open() {
    let h = harness().await;

    for _ in 0..3 {
        assert!(h.service.check_support_ticket_limit().await.allowed);
        assert!(h.service.record_support_ticket(ticket()).await);
    }

    let decision = h.service.check_support_ticket_limit().await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining_requests, Some(0));
    assert_eq!(decision.reason, Some(DenialReason::DailyTicketLimit));

    h.store.set_failing(true);

    let decision = h.service.check_support_ticket_limit().await;
    assert!(!decision.allowed);
    assert_eq!(decision.remaining_requests, Some(0));

    assert!(h.service.check_security_limits(OperationType::Login, None).await.allowed);
    assert!(!h.service.record_support_ticket(ticket()).await);
}

#[tokio::test]
async fn recording_survives_store_outage() {
    let h = harness().await;
    h.store.set_failing(true);

    h.service
        .record_attempt(OperationType::Register, false, None)
        .await;
    assert!(h.service.get_suspicious_devices().await.is_empty());

    h.store.set_failing(false);
    h.service
        .record_attempt(OperationType::Register, true, None)
        .await;
    assert_eq!(h.ledger().await.total_attempts, 1);
}
