//! Core server: accepts WebSocket connections and runs one relay session each.

use crate::config::ServerConfig;
use crate::transport::websocket::{self, WebSocketConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, info_span, Instrument};
use wsrelay_core::{RelayError, RelayResult, SessionCoordinator};

/// The relay server instance.
pub struct RelayServer {
    config: ServerConfig,
    coordinator: Arc<SessionCoordinator>,
}

impl RelayServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig) -> RelayResult<Self> {
        let coordinator = Arc::new(SessionCoordinator::new(&config.relay)?);
        Ok(Self {
            config,
            coordinator,
        })
    }

    /// Bind the listener and relay connections until the listener stops.
    pub async fn run(self, tls_config: Option<Arc<rustls::ServerConfig>>) -> RelayResult<()> {
        let bind_addr: SocketAddr = format!("0.0.0.0:{}", self.config.port)
            .parse()
            .map_err(|e| RelayError::Other(format!("invalid address: {e}")))?;

        let acceptor = tls_config.map(TlsAcceptor::from);
        let (local_addr, rx) = websocket::start_listener(bind_addr, acceptor).await?;

        info!(
            addr = %local_addr,
            backend = %self.coordinator.backend_addr(),
            auth = self.coordinator.auth_enabled(),
            "ws-tcp-relay ready"
        );

        self.serve(rx).await;
        Ok(())
    }

    /// Spawn a session for every accepted connection.
    async fn serve(self, mut rx: mpsc::Receiver<WebSocketConnection>) {
        while let Some(conn) = rx.recv().await {
            let coordinator = self.coordinator.clone();
            let remote = conn.remote_addr;
            tokio::spawn(
                async move {
                    // Dial failures are logged by the coordinator.
                    if let Err(e) = coordinator.run(conn.ws_stream).await {
                        debug!(error = %e, "session aborted");
                    }
                }
                .instrument(info_span!("session", remote = %remote)),
            );
        }
        info!("listener closed, shutting down");
    }
}
