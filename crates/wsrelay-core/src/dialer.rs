//! Backend dialing: one fresh TCP connection per session, no retry.

use crate::error::{RelayError, RelayResult};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens connections to the configured backend address.
#[derive(Debug, Clone)]
pub struct BackendDialer {
    addr: String,
    timeout: Duration,
}

impl BackendDialer {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connect to the backend. Refusal, unreachability and timeout are all
    /// [`RelayError::Dial`].
    pub async fn dial(&self) -> RelayResult<TcpStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| RelayError::Dial(format!("{}: connect timed out", self.addr)))?
            .map_err(|e| RelayError::Dial(format!("{}: {e}", self.addr)))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %self.addr, error = %e, "could not set TCP_NODELAY");
        }
        Ok(stream)
    }
}
