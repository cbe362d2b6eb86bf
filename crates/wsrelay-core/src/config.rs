//! Relay configuration, built once at startup and shared by every session.

use crate::handshake::MAX_HANDSHAKE_SIZE;
use std::time::Duration;

/// Per-process relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Backend address, `host:port`.
    pub backend_addr: String,
    /// Authorization endpoint. `None` disables the gate.
    pub auth_url: Option<String>,
    /// Upper bound on the whole handshake phase (waiting for the first
    /// `CONNECT ` message plus the authorization call).
    pub handshake_timeout: Duration,
    /// Upper bound on a single authorization HTTP call.
    pub auth_timeout: Duration,
    /// Upper bound on connecting to the backend.
    pub dial_timeout: Duration,
    /// Largest handshake message the gate will parse.
    pub max_handshake_size: usize,
}

impl RelayConfig {
    /// Defaults for everything except the backend address.
    pub fn new(backend_addr: impl Into<String>) -> Self {
        Self {
            backend_addr: backend_addr.into(),
            auth_url: None,
            handshake_timeout: Duration::from_secs(default_handshake_timeout()),
            auth_timeout: Duration::from_secs(default_auth_timeout()),
            dial_timeout: Duration::from_secs(default_dial_timeout()),
            max_handshake_size: MAX_HANDSHAKE_SIZE,
        }
    }

    /// Set the authorization URL. An empty string disables auth.
    pub fn with_auth_url(mut self, url: Option<String>) -> Self {
        self.auth_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn auth_enabled(&self) -> bool {
        self.auth_url.is_some()
    }
}

pub fn default_handshake_timeout() -> u64 {
    10
}
pub fn default_auth_timeout() -> u64 {
    10
}
pub fn default_dial_timeout() -> u64 {
    10
}
