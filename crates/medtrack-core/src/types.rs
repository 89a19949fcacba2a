//! Core types for MedTrack device trust
//!
//! These are the documents the guard persists: per-device security ledgers
//! and support ticket submissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable per-installation device identifier
#[derive(Clone, Hash, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Guarded authentication operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Login,
    Register,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Login => "login",
            OperationType::Register => "register",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "login" => Ok(OperationType::Login),
            "register" => Ok(OperationType::Register),
            other => Err(format!("unknown operation type: {}", other)),
        }
    }
}

/// Descriptive metadata about the device, refreshed on every recorded attempt
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub os_name: String,
    pub os_version: String,
    pub model: String,
    pub locale: String,
    pub region: String,
    pub timezone: String,
}

/// A single authentication attempt. Never mutated once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub operation_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub success: bool,
}

/// Per-device attempt history and block state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLedger {
    pub device_id: DeviceId,
    pub device_info: DeviceInfo,
    /// Attempts inside the retention window, oldest first
    pub attempts: Vec<AttemptRecord>,
    /// Lifetime counter, only reset by an admin unblock
    pub total_attempts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Write version for compare-and-swap updates
    #[serde(default)]
    pub version: u64,
}

impl SecurityLedger {
    /// Create an empty ledger for a newly seen device
    pub fn new(device_id: DeviceId, device_info: DeviceInfo, now: DateTime<Utc>) -> Self {
        Self {
            device_id,
            device_info,
            attempts: Vec::new(),
            total_attempts: 0,
            blocked_until: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Whether an active block covers `now`
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    /// Drop attempts older than `cutoff`
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.attempts.len();
        self.attempts.retain(|a| a.timestamp >= cutoff);
        before - self.attempts.len()
    }

    /// Attempts strictly newer than `since`
    pub fn attempts_since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &AttemptRecord> {
        self.attempts.iter().filter(move |a| a.timestamp > since)
    }

    /// Number of failed attempts strictly newer than `since`, any operation type
    pub fn failures_since(&self, since: DateTime<Utc>) -> usize {
        self.attempts_since(since).filter(|a| !a.success).count()
    }

    /// Bump `updated_at`, keeping it at or after `created_at`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }
}

/// Ticket content supplied by the support screen
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub subject: String,
    pub message: String,
}

/// A stored support ticket, keyed by submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicket {
    pub id: String,
    pub device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub subject: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
