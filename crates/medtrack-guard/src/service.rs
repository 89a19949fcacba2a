//! Device trust service
//!
//! The single entry point the register/login screens and the admin tooling
//! talk to. It wires the identity resolver, ledger, evaluator, block state
//! machine, reporter and ticket guard over one store and one clock.
//!
//! Calling order for a guarded operation:
//! 1) `check_security_limits` before attempting it.
//! 2) `record_attempt` once its outcome is known.

use std::sync::Arc;

use medtrack_core::{
    Clock, DeviceId, DeviceIdResolver, DeviceInfoSource, GuardConfig, HostDeviceInfo,
    KeyValueStore, OperationType, SecurityLedger, StoreError, SystemClock, TicketSubmission,
};

use crate::block::{BlockState, BlockStateMachine};
use crate::decision::{LimitDecision, TicketDecision};
use crate::evaluator::RateLimitEvaluator;
use crate::ledger::AttemptLedger;
use crate::reporter::{SuspiciousDeviceReporter, TrustStats};
use crate::store::DocumentStore;
use crate::tickets::SupportTicketGuard;

pub struct DeviceTrustService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    identity: DeviceIdResolver,
    ledger: AttemptLedger,
    evaluator: RateLimitEvaluator,
    blocks: Arc<BlockStateMachine>,
    reporter: SuspiciousDeviceReporter,
    tickets: SupportTicketGuard,
}

impl DeviceTrustService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        device_info: Arc<dyn DeviceInfoSource>,
        config: &GuardConfig,
    ) -> Self {
        let blocks = Arc::new(BlockStateMachine::new(
            store.clone(),
            clock.clone(),
            config.ledger.max_write_retries,
        ));

        Self {
            identity: DeviceIdResolver::new(kv, clock.clone()),
            ledger: AttemptLedger::new(
                store.clone(),
                clock.clone(),
                device_info,
                config.ledger.clone(),
            ),
            evaluator: RateLimitEvaluator::new(
                store.clone(),
                clock.clone(),
                blocks.clone(),
                config.limits.clone(),
            ),
            reporter: SuspiciousDeviceReporter::new(
                store.clone(),
                clock.clone(),
                config.reporter.clone(),
            ),
            tickets: SupportTicketGuard::new(store.clone(), clock.clone(), config.tickets.clone()),
            blocks,
            store,
            clock,
        }
    }

    /// Service on the system clock with host device metadata
    pub fn with_system_clock(
        store: Arc<dyn DocumentStore>,
        kv: Arc<dyn KeyValueStore>,
        config: &GuardConfig,
    ) -> Self {
        Self::new(
            store,
            kv,
            Arc::new(SystemClock),
            Arc::new(HostDeviceInfo),
            config,
        )
    }

    /// This installation's device id
    pub async fn get_device_id(&self) -> DeviceId {
        self.identity.device_id().await
    }

    /// Ask before attempting a login or registration
    pub async fn check_security_limits(
        &self,
        operation: OperationType,
        email: Option<&str>,
    ) -> LimitDecision {
        let device_id = self.get_device_id().await;
        self.evaluator
            .check_limits(&device_id, operation, email)
            .await
    }

    /// Report the outcome after the operation completes
    pub async fn record_attempt(&self, operation: OperationType, success: bool, email: Option<&str>) {
        let device_id = self.get_device_id().await;
        self.ledger
            .record_attempt(&device_id, operation, success, email)
            .await;
    }

    pub async fn get_suspicious_devices(&self) -> Vec<SecurityLedger> {
        self.reporter.get_suspicious_devices().await
    }

    pub async fn unblock_device(&self, device_id: &DeviceId) -> bool {
        self.blocks.unblock_device(device_id).await
    }

    pub async fn check_support_ticket_limit(&self) -> TicketDecision {
        let device_id = self.get_device_id().await;
        self.tickets.check_limit(&device_id).await
    }

    pub async fn record_support_ticket(&self, submission: TicketSubmission) -> bool {
        let device_id = self.get_device_id().await;
        self.tickets.record_ticket(&device_id, submission).await
    }

    /// Point read of any device's ledger, for admin display
    pub async fn get_ledger(&self, device_id: &DeviceId) -> Result<Option<SecurityLedger>, StoreError> {
        self.store.get_ledger(device_id).await
    }

    /// Block state of a ledger as of now
    pub fn block_state(&self, ledger: &SecurityLedger) -> BlockState {
        BlockState::of(ledger, self.clock.now())
    }

    pub async fn stats(&self) -> Result<TrustStats, StoreError> {
        self.reporter.stats().await
    }
}
