//! MedTrack Core - Shared types, configuration, and device identity
//!
//! This crate contains the foundational types used by the device trust guard.
//! It has no dependencies on the document store.

pub mod clock;
pub mod config;
pub mod device_info;
pub mod error;
pub mod identity;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    EmailMode, GuardConfig, LedgerConfig, LimitsConfig, ReporterConfig, StoreConfig,
    StoreErrorPolicy, TicketConfig,
};
pub use device_info::{DeviceInfoSource, HostDeviceInfo, StaticDeviceInfo};
pub use error::*;
pub use identity::{DeviceIdResolver, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use types::*;

/// Length of the short sliding window in minutes
pub const HOURLY_WINDOW_MINS: i64 = 60;

/// Length of the long sliding window in minutes
pub const DAILY_WINDOW_MINS: i64 = 24 * 60;
