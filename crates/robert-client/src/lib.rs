//! ROBERT client session
//!
//! Drives the protocol lifecycle of one device against a ROBERT server:
//! registration, periodic status checks, self-reporting, and unregistration.
//!
//! # Architecture
//!
//! A [`Session`] is constructed once at startup from four collaborators:
//!
//! - a [`ServerApi`] performing request/response exchanges
//! - a [`SessionStore`](robert_core::SessionStore) persisting secrets, epochs
//!   and flags
//! - a [`ProximityStore`](robert_core::ProximityStore) holding recorded
//!   contacts
//! - an [`Environment`](robert_core::env::Environment) for time and randomness
//!
//! All persisted state changes happen after the server response has been
//! fully validated and are written in one transaction, so a failed, timed
//! out, or cancelled operation leaves the last committed state in place.
//!
//! # Concurrency
//!
//! At most one protocol operation runs at a time. A second caller gets
//! [`SessionError::OperationInProgress`] immediately. The one exception is
//! [`Session::report`], which preempts a running status check.
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, [`transport::HttpsServerApi`]
//! implements [`ServerApi`] over HTTPS with certificate pinning.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod api;
mod config;
mod error;
mod event;
mod gate;
mod session;
mod system_env;

#[cfg(feature = "transport")]
pub mod transport;

pub use api::ServerApi;
pub use config::SessionConfig;
pub use error::{ApiError, SessionError};
pub use event::{Health, Operation, ReportReceipt, SessionEvent, SessionState, StatusOutcome};
pub use robert_core::env::Environment;
pub use session::Session;
pub use system_env::SystemEnv;
