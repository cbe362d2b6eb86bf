//! wsrelay-core: relay core for ws-tcp-relay.
//!
//! Bridges one WebSocket client to one TCP backend per session, optionally
//! gated by a bearer-token check against an external authorization service.

pub mod auth;
pub mod config;
pub mod dialer;
pub mod error;
pub mod gate;
pub mod handshake;
pub mod pump;
pub mod session;

#[cfg(test)]
mod test_util;

// Re-export commonly used items at crate root.
pub use auth::{AuthDecision, Authorizer, HttpAuthorizer};
pub use config::RelayConfig;
pub use dialer::BackendDialer;
pub use error::{RelayError, RelayResult};
pub use handshake::{AuthToken, CONNECT_PREFIX, MAX_HANDSHAKE_SIZE};
pub use pump::{Direction, PumpReport, StreamEnd};
pub use session::{SessionCoordinator, SessionSummary};
