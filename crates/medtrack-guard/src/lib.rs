//! MedTrack Guard - device trust and rate limiting for authentication flows
//!
//! Screens consult the guard before a login or registration and report the
//! outcome afterwards. Admin tooling reads the same store to review and
//! unblock devices.
//!
//! # Flow
//!
//! 1. Resolve the installation's device id
//! 2. Check the device ledger against block state and sliding-window limits
//! 3. Perform the guarded operation
//! 4. Append the outcome to the ledger, pruning expired records

pub mod block;
pub mod decision;
pub mod evaluator;
pub mod ledger;
pub mod reporter;
pub mod service;
pub mod store;
pub mod tickets;

pub use block::{BlockState, BlockStateMachine};
pub use decision::{DenialReason, LimitDecision, TicketDecision};
pub use evaluator::{RateLimitEvaluator, WindowCounts};
pub use ledger::AttemptLedger;
pub use reporter::{SuspiciousDeviceReporter, TrustStats};
pub use service::DeviceTrustService;
pub use store::{DocumentStore, MemoryStore, SqliteStore};
pub use tickets::SupportTicketGuard;
