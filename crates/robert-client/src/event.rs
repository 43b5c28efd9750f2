//! Session states, operations and published events.

use std::fmt;

use crate::error::SessionError;

/// Protocol operations. At most one is in flight per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Registration with captcha proof
    Register,
    /// Exposure status check
    CheckStatus,
    /// Self-declared positive diagnosis
    Report,
    /// Unregistration and local cleanup
    Unregister,
    /// Server-side exposure history deletion
    DeleteExposureHistory,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Register => "register",
            Self::CheckStatus => "check status",
            Self::Report => "report",
            Self::Unregister => "unregister",
            Self::DeleteExposureHistory => "delete exposure history",
        })
    }
}

/// Health flag of a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// No positive report sent
    Healthy,
    /// A positive report was accepted by the server
    Sick,
}

/// Lifecycle state as seen by callers.
///
/// `Registering`, `Reporting` and `Unregistering` only exist while the
/// corresponding operation runs; they are never persisted, so a restart
/// resumes from the last stable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No registration secrets held
    Unregistered,
    /// Registration in flight
    Registering,
    /// Registered with the server
    Registered(Health),
    /// Report in flight
    Reporting,
    /// Unregistration in flight
    Unregistering,
}

impl SessionState {
    /// Whether this is `Registered(_)`.
    pub fn is_registered(self) -> bool {
        matches!(self, Self::Registered(_))
    }
}

/// Result of a successful status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// No exposure reported
    NotAtRisk,
    /// Exposure reported by the server
    AtRisk {
        /// Server-supplied exposure timeframe, if any
        last_exposure_timeframe: Option<i64>,
    },
}

/// Result of an accepted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportReceipt {
    /// Whether the coupled unregister also succeeded on the server. Local
    /// data is cleared either way.
    pub unregistered_remotely: bool,
}

/// Notifications published to [`Session::subscribe`](crate::Session::subscribe)
/// receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Observable state changed
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },

    /// A status check completed
    StatusChecked(StatusOutcome),

    /// An operation resolved to an error
    OperationFailed {
        /// Operation that failed
        operation: Operation,
        /// Error it resolved to
        error: SessionError,
    },
}
