//! Allow/deny decisions returned to the calling screens
//!
//! A breach or an active block is not an error: it is a normal `allowed:
//! false` decision carrying a displayable reason and a wait time in minutes.

use serde::{Serialize, Serializer};

use medtrack_core::OperationType;

/// Why an operation was denied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenialReason {
    TemporarilyBlocked,
    HourlyLoginLimit,
    DailyLoginLimit,
    HourlyRegisterLimit,
    DailyRegisterLimit,
    TooManyFailures,
    DailyTicketLimit,
    /// Store unreachable under a fail-closed policy
    ServiceUnavailable,
}

impl DenialReason {
    pub(crate) fn hourly_limit(op: OperationType) -> Self {
        match op {
            OperationType::Login => DenialReason::HourlyLoginLimit,
            OperationType::Register => DenialReason::HourlyRegisterLimit,
        }
    }

    pub(crate) fn daily_limit(op: OperationType) -> Self {
        match op {
            OperationType::Login => DenialReason::DailyLoginLimit,
            OperationType::Register => DenialReason::DailyRegisterLimit,
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            DenialReason::TemporarilyBlocked => {
                "This device is temporarily blocked because of suspicious activity"
            }
            DenialReason::HourlyLoginLimit => "Hourly login limit exceeded",
            DenialReason::DailyLoginLimit => "Daily login limit exceeded",
            DenialReason::HourlyRegisterLimit => "Hourly registration limit exceeded",
            DenialReason::DailyRegisterLimit => "Daily registration limit exceeded",
            DenialReason::TooManyFailures => {
                "Too many failed attempts; this device is blocked for one hour"
            }
            DenialReason::DailyTicketLimit => "Daily support request limit reached",
            DenialReason::ServiceUnavailable => {
                "Service temporarily unavailable, please try again later"
            }
        };
        f.write_str(msg)
    }
}

impl Serialize for DenialReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of a login/register limit check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    /// Minutes until a retry can succeed
    #[serde(rename = "waitTime", skip_serializing_if = "Option::is_none")]
    pub wait_minutes: Option<i64>,
}

impl LimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            wait_minutes: None,
        }
    }

    pub fn deny(reason: DenialReason, wait_minutes: i64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            wait_minutes: Some(wait_minutes),
        }
    }
}

/// Outcome of a support ticket quota check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_requests: Option<usize>,
}

impl TicketDecision {
    pub fn allow(remaining: usize) -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining_requests: Some(remaining),
        }
    }

    pub fn deny(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            remaining_requests: Some(0),
        }
    }
}
