//! Session lifecycle: one client <-> backend pairing.
//!
//! ```text
//! Dialing --dial ok--> Relaying --first completion--> Closing --second completion--> Done
//!    \--dial failed--> Aborted
//! ```
//!
//! While relaying, exactly two direction tasks are outstanding. The
//! client->backend task runs the gate first when auth is configured. The
//! first task to finish triggers the close of both endpoints; the session is
//! only torn down once the second task has been observed to finish as well.

use crate::auth::{Authorizer, HttpAuthorizer};
use crate::config::RelayConfig;
use crate::dialer::BackendDialer;
use crate::error::{RelayError, RelayResult};
use crate::gate::authorize_client;
use crate::pump::{self, close_requested, Direction, PumpReport, StreamEnd};
use futures_util::{Stream, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Everything the gate needs, moved into the client->backend task.
#[derive(Clone)]
struct GateSettings {
    authorizer: Arc<dyn Authorizer>,
    handshake_timeout: Duration,
    max_handshake_size: usize,
}

/// Result of a finished session.
#[derive(Debug)]
pub struct SessionSummary {
    pub session_id: String,
    /// One report per direction, in completion order.
    pub reports: Vec<PumpReport>,
}

impl SessionSummary {
    pub fn report(&self, direction: Direction) -> Option<&PumpReport> {
        self.reports.iter().find(|r| r.direction == direction)
    }
}

/// Runs relay sessions. One instance is shared by every accepted client.
pub struct SessionCoordinator {
    dialer: BackendDialer,
    gate: Option<GateSettings>,
}

impl SessionCoordinator {
    /// Build a coordinator from config, with an HTTP authorizer when an
    /// auth URL is configured.
    pub fn new(config: &RelayConfig) -> RelayResult<Self> {
        let authorizer = match &config.auth_url {
            Some(url) => {
                let http = HttpAuthorizer::new(url, config.auth_timeout)?;
                Some(Arc::new(http) as Arc<dyn Authorizer>)
            }
            None => None,
        };
        Ok(Self::with_authorizer(config, authorizer))
    }

    /// Build a coordinator with an explicit authorizer. `None` disables
    /// the gate regardless of `config.auth_url`.
    pub fn with_authorizer(config: &RelayConfig, authorizer: Option<Arc<dyn Authorizer>>) -> Self {
        Self {
            dialer: BackendDialer::new(config.backend_addr.clone(), config.dial_timeout),
            gate: authorizer.map(|authorizer| GateSettings {
                authorizer,
                handshake_timeout: config.handshake_timeout,
                max_handshake_size: config.max_handshake_size,
            }),
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.gate.is_some()
    }

    pub fn backend_addr(&self) -> &str {
        self.dialer.addr()
    }

    /// Relay one accepted client until both directions are done.
    ///
    /// Fails only when the backend cannot be dialed; in that case no pump
    /// is started and the client is dropped unrelayed.
    pub async fn run<S>(&self, client: WebSocketStream<S>) -> RelayResult<SessionSummary>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = generate_session_id();

        debug!(session_id = %session_id, backend = %self.dialer.addr(), "dialing backend");
        let backend = match self.dialer.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "backend dial failed");
                return Err(e);
            }
        };
        info!(
            session_id = %session_id,
            backend = %self.dialer.addr(),
            auth = self.gate.is_some(),
            "session relaying"
        );

        let (client_sink, client_source) = client.split();
        let (backend_read, backend_write) = backend.into_split();
        let (close_tx, close_rx) = watch::channel(false);

        let mut directions = JoinSet::new();
        directions.spawn(client_direction(
            client_source,
            backend_write,
            self.gate.clone(),
            close_rx.clone(),
            session_id.clone(),
        ));
        directions.spawn(pump::backend_to_client(backend_read, client_sink, close_rx));

        let mut reports = Vec::with_capacity(2);

        // First completion closes both endpoints, which unblocks the other
        // direction wherever it is waiting.
        if let Some(joined) = directions.join_next().await {
            record(&session_id, joined, &mut reports);
        }
        let _ = close_tx.send(true);

        if let Some(joined) = directions.join_next().await {
            record(&session_id, joined, &mut reports);
        }

        let summary = SessionSummary {
            session_id,
            reports,
        };
        info!(
            session_id = %summary.session_id,
            up_bytes = summary.report(Direction::ClientToBackend).map_or(0, |r| r.bytes),
            down_bytes = summary.report(Direction::BackendToClient).map_or(0, |r| r.bytes),
            "session closed"
        );
        Ok(summary)
    }
}

/// The client->backend direction: gate (if any), then an unconditional pump.
async fn client_direction<R>(
    mut source: R,
    sink: OwnedWriteHalf,
    gate: Option<GateSettings>,
    mut close_rx: watch::Receiver<bool>,
    session_id: String,
) -> PumpReport
where
    R: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    if let Some(gate) = gate {
        let verdict = tokio::select! {
            _ = close_requested(&mut close_rx) => Err(StreamEnd::Closed),
            result = tokio::time::timeout(
                gate.handshake_timeout,
                authorize_client(&mut source, gate.authorizer.as_ref(), gate.max_handshake_size),
            ) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(StreamEnd::Denied(e.to_string())),
                Err(_) => Err(StreamEnd::Denied(RelayError::Timeout.to_string())),
            },
        };

        if let Err(end) = verdict {
            info!(session_id = %session_id, end = ?end, "client not admitted");
            // Dropping the write half sends FIN; nothing was forwarded.
            drop(sink);
            return PumpReport {
                direction: Direction::ClientToBackend,
                bytes: 0,
                end,
            };
        }
        debug!(session_id = %session_id, "gate passed, relaying client traffic");
    }

    pump::client_to_backend(source, sink, close_rx).await
}

fn record(
    session_id: &str,
    joined: Result<PumpReport, JoinError>,
    reports: &mut Vec<PumpReport>,
) {
    match joined {
        Ok(report) => {
            debug!(
                session_id = %session_id,
                direction = %report.direction,
                bytes = report.bytes,
                end = ?report.end,
                "direction finished"
            );
            reports.push(report);
        }
        Err(e) => warn!(session_id = %session_id, error = %e, "direction task failed"),
    }
}

/// Generate a random session ID.
fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{spawn_auth_server, spawn_stalled_auth_server, ws_pair};
    use futures_util::SinkExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    const BOUND: Duration = Duration::from_secs(5);

    async fn backend_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    /// Start a session over an in-memory WebSocket and accept its backend
    /// connection. Returns the client side, the backend side and the
    /// session handle.
    async fn start(
        coordinator: SessionCoordinator,
        listener: &TcpListener,
    ) -> (
        WebSocketStream<DuplexStream>,
        TcpStream,
        JoinHandle<RelayResult<SessionSummary>>,
    ) {
        let (server_ws, client_ws) = ws_pair().await;
        let session = tokio::spawn(async move { coordinator.run(server_ws).await });
        let (backend, _) = tokio::time::timeout(BOUND, listener.accept())
            .await
            .unwrap()
            .unwrap();
        (client_ws, backend, session)
    }

    async fn finish(session: JoinHandle<RelayResult<SessionSummary>>) -> SessionSummary {
        tokio::time::timeout(BOUND, session)
            .await
            .expect("session should tear down")
            .unwrap()
            .unwrap()
    }

    async fn read_all(backend: &mut TcpStream) -> Vec<u8> {
        let mut received = Vec::new();
        tokio::time::timeout(BOUND, backend.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        received
    }

    #[tokio::test]
    async fn pass_through_without_auth() {
        let (listener, addr) = backend_listener().await;
        let coordinator = SessionCoordinator::new(&RelayConfig::new(addr)).unwrap();
        assert!(!coordinator.auth_enabled());
        let (mut client, mut backend, session) = start(coordinator, &listener).await;

        let mut expected = Vec::new();
        for i in 0..50 {
            let chunk = format!("PUB subject {i}\r\n").into_bytes();
            expected.extend_from_slice(&chunk);
            client.send(Message::Binary(chunk.into())).await.unwrap();
        }
        let mut received = vec![0u8; expected.len()];
        backend.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        backend.write_all(b"MSG subject 1 5\r\nhello\r\n").await.unwrap();
        let mut down = Vec::new();
        while down.len() < 24 {
            match client.next().await.unwrap().unwrap() {
                Message::Binary(data) => down.extend_from_slice(&data),
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert_eq!(down, b"MSG subject 1 5\r\nhello\r\n");

        client.close(None).await.unwrap();
        let summary = finish(session).await;
        assert_eq!(summary.reports.len(), 2);
        assert_eq!(
            summary.report(Direction::ClientToBackend).unwrap().end,
            StreamEnd::Eof
        );
        assert_eq!(
            summary.report(Direction::BackendToClient).unwrap().bytes,
            24
        );
    }

    #[tokio::test]
    async fn authorized_client_forwards_only_post_handshake_bytes() {
        let auth = spawn_auth_server(200, r#"{"authorized": true}"#).await;
        let (listener, addr) = backend_listener().await;
        let config = RelayConfig::new(addr).with_auth_url(Some(auth.url.clone()));
        let coordinator = SessionCoordinator::new(&config).unwrap();
        assert!(coordinator.auth_enabled());
        let (mut client, mut backend, session) = start(coordinator, &listener).await;

        client
            .send(Message::Text(r#"CONNECT {"auth_token":"abc123"}"#.into()))
            .await
            .unwrap();
        client.send(Message::Text("PING\n".into())).await.unwrap();

        let mut received = [0u8; 5];
        tokio::time::timeout(BOUND, backend.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&received, b"PING\n");

        client.close(None).await.unwrap();
        // Nothing but PING ever reaches the backend.
        assert!(read_all(&mut backend).await.is_empty());

        let summary = finish(session).await;
        assert_eq!(auth.authorization_headers(), vec!["Bearer abc123"]);
        assert_eq!(summary.report(Direction::ClientToBackend).unwrap().bytes, 5);
    }

    #[tokio::test]
    async fn rejected_client_forwards_nothing() {
        let auth = spawn_auth_server(200, r#"{"authorized": false}"#).await;
        let (listener, addr) = backend_listener().await;
        let config = RelayConfig::new(addr).with_auth_url(Some(auth.url.clone()));
        let (mut client, mut backend, session) =
            start(SessionCoordinator::new(&config).unwrap(), &listener).await;

        client
            .send(Message::Text(r#"CONNECT {"auth_token":"bad"}"#.into()))
            .await
            .unwrap();
        // Sent after the handshake; must never reach the backend.
        let _ = client.send(Message::Text("PING\n".into())).await;

        assert!(read_all(&mut backend).await.is_empty());
        let summary = finish(session).await;
        assert_eq!(summary.reports.len(), 2);
        let up = summary.report(Direction::ClientToBackend).unwrap();
        assert_eq!(up.bytes, 0);
        assert!(matches!(up.end, StreamEnd::Denied(_)));
        assert_eq!(auth.hits(), 1);
    }

    #[tokio::test]
    async fn missing_token_closes_backend_without_auth_call() {
        let auth = spawn_auth_server(200, r#"{"authorized": true}"#).await;
        let (listener, addr) = backend_listener().await;
        let config = RelayConfig::new(addr).with_auth_url(Some(auth.url.clone()));
        let (mut client, mut backend, session) =
            start(SessionCoordinator::new(&config).unwrap(), &listener).await;

        client.send(Message::Text("CONNECT {}".into())).await.unwrap();

        assert!(read_all(&mut backend).await.is_empty());
        finish(session).await;
        assert_eq!(auth.hits(), 0);
    }

    #[tokio::test]
    async fn unprefixed_client_waits_then_times_out() {
        let auth = spawn_auth_server(200, r#"{"authorized": true}"#).await;
        let (listener, addr) = backend_listener().await;
        let mut config = RelayConfig::new(addr).with_auth_url(Some(auth.url.clone()));
        config.handshake_timeout = Duration::from_millis(500);
        let (mut client, mut backend, session) =
            start(SessionCoordinator::new(&config).unwrap(), &listener).await;

        client.send(Message::Text("PING\n".into())).await.unwrap();

        // Still gated well before the deadline, with nothing forwarded.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!session.is_finished());
        let mut buf = [0u8; 16];
        assert!(
            tokio::time::timeout(Duration::from_millis(100), backend.read(&mut buf))
                .await
                .is_err()
        );

        let summary = finish(session).await;
        let up = summary.report(Direction::ClientToBackend).unwrap();
        assert_eq!(up.end, StreamEnd::Denied(RelayError::Timeout.to_string()));
        assert!(read_all(&mut backend).await.is_empty());
        assert_eq!(auth.hits(), 0);
    }

    #[tokio::test]
    async fn unreachable_auth_service_still_tears_down() {
        let (dead, _) = backend_listener().await;
        let dead_url = format!("http://{}/auth", dead.local_addr().unwrap());
        drop(dead);

        let (listener, addr) = backend_listener().await;
        let config = RelayConfig::new(addr).with_auth_url(Some(dead_url));
        let (mut client, mut backend, session) =
            start(SessionCoordinator::new(&config).unwrap(), &listener).await;

        client
            .send(Message::Text(r#"CONNECT {"auth_token":"abc"}"#.into()))
            .await
            .unwrap();

        assert!(read_all(&mut backend).await.is_empty());
        let summary = finish(session).await;
        assert!(matches!(
            summary.report(Direction::ClientToBackend).unwrap().end,
            StreamEnd::Denied(_)
        ));
    }

    #[tokio::test]
    async fn backend_close_tears_down_both_directions() {
        let (listener, addr) = backend_listener().await;
        let coordinator = SessionCoordinator::new(&RelayConfig::new(addr)).unwrap();
        let (mut client, backend, session) = start(coordinator, &listener).await;

        client
            .send(Message::Binary(b"SUB foo 1\r\n".to_vec().into()))
            .await
            .unwrap();
        drop(backend);

        let summary = finish(session).await;
        assert_eq!(summary.reports.len(), 2);
        let down = summary.report(Direction::BackendToClient).unwrap();
        assert!(matches!(down.end, StreamEnd::Eof | StreamEnd::ReadFailed(_)));
        let up = summary.report(Direction::ClientToBackend).unwrap();
        assert!(!matches!(up.end, StreamEnd::Denied(_)));

        // The client sees the relay close its side.
        let closed = tokio::time::timeout(BOUND, async {
            loop {
                match client.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn backend_flows_while_authorization_pending() {
        let auth = spawn_stalled_auth_server().await;
        let (listener, addr) = backend_listener().await;
        let mut config = RelayConfig::new(addr).with_auth_url(Some(auth.url.clone()));
        config.handshake_timeout = Duration::from_secs(60);
        config.auth_timeout = Duration::from_secs(60);
        let (mut client, mut backend, session) =
            start(SessionCoordinator::new(&config).unwrap(), &listener).await;

        client
            .send(Message::Text(r#"CONNECT {"auth_token":"a"}"#.into()))
            .await
            .unwrap();
        backend.write_all(b"INFO\r\n").await.unwrap();

        let msg = tokio::time::timeout(BOUND, client.next())
            .await
            .expect("backend bytes must not wait for the gate")
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::Binary(b"INFO\r\n".to_vec().into()));
        assert!(!session.is_finished());

        // The client side is still gated: nothing reached the backend.
        let mut buf = [0u8; 16];
        assert!(
            tokio::time::timeout(Duration::from_millis(200), backend.read(&mut buf))
                .await
                .is_err()
        );
        session.abort();
    }

    #[tokio::test]
    async fn backend_close_interrupts_gate() {
        let auth = spawn_auth_server(200, r#"{"authorized": true}"#).await;
        let (listener, addr) = backend_listener().await;
        let mut config = RelayConfig::new(addr).with_auth_url(Some(auth.url.clone()));
        config.handshake_timeout = Duration::from_secs(60);
        let (_client, backend, session) =
            start(SessionCoordinator::new(&config).unwrap(), &listener).await;

        drop(backend);

        let summary = finish(session).await;
        assert_eq!(
            summary.report(Direction::ClientToBackend).unwrap().end,
            StreamEnd::Closed
        );
    }

    #[tokio::test]
    async fn dial_failure_aborts_session() {
        let (listener, addr) = backend_listener().await;
        drop(listener);

        let coordinator = SessionCoordinator::new(&RelayConfig::new(addr)).unwrap();
        let (server_ws, _client_ws) = ws_pair().await;
        let result = coordinator.run(server_ws).await;
        assert!(matches!(result, Err(RelayError::Dial(_))));
    }

    #[test]
    fn session_ids_are_unique_hex() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
