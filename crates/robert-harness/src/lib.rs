//! Deterministic simulation harness for the ROBERT client.
//!
//! In-process implementations of the client's collaborators for reproducible
//! end-to-end tests:
//!
//! - [`SimEnv`]: settable wall clock and seeded RNG
//! - [`SimServer`]: a protocol-faithful server (real ECDH, MAC verification,
//!   sealed epoch material) with fault injection
//! - [`ChaoticSessionStore`]: session store wrapper that fails writes on
//!   demand

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaotic;
pub mod sim_env;
pub mod sim_server;

pub use chaotic::ChaoticSessionStore;
pub use sim_env::SimEnv;
pub use sim_server::{Endpoint, Fault, SimServer};
