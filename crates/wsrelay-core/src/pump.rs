//! One-directional byte pumps.
//!
//! A pump copies unconditionally from its source to its sink until the
//! source reports end-of-stream, either side errors, or the session asks it
//! to stop through the close signal. Whatever the reason, it closes the sink
//! it owns on the way out and reports exactly once.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

/// Read buffer for the backend side.
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// How long a pump waits for its sink to close before giving up on it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One of the two byte-flow paths in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// Why a direction stopped. End-of-stream and I/O errors are both just
/// "done" as far as the session is concerned; the distinction is kept for
/// logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Source reached end-of-stream.
    Eof,
    ReadFailed(String),
    WriteFailed(String),
    /// The session closed the endpoints.
    Closed,
    /// The gate refused the client; nothing was forwarded.
    Denied(String),
}

/// Completion report of one direction.
#[derive(Debug, Clone)]
pub struct PumpReport {
    pub direction: Direction,
    /// Bytes written to the sink.
    pub bytes: u64,
    pub end: StreamEnd,
}

enum Step {
    Forwarded(usize),
    End(StreamEnd),
}

/// Resolves once the session has asked both endpoints to close. A dropped
/// sender counts as a close request.
pub(crate) async fn close_requested(close_rx: &mut watch::Receiver<bool>) {
    let _ = close_rx.wait_for(|closed| *closed).await;
}

/// Receive the next data-bearing message from the client.
///
/// Binary and text payloads are both returned as bytes. Ping/pong frames
/// are answered by the WebSocket layer and skipped. `None` on close.
pub(crate) async fn next_payload<R>(source: &mut R) -> Result<Option<Vec<u8>>, WsError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match source.next().await {
            Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
            Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e),
        }
    }
}

/// Copy client messages into the backend byte stream.
pub async fn client_to_backend<R, W>(
    mut source: R,
    mut sink: W,
    mut close_rx: watch::Receiver<bool>,
) -> PumpReport
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut bytes = 0u64;

    let end = loop {
        let step = tokio::select! {
            _ = close_requested(&mut close_rx) => Step::End(StreamEnd::Closed),
            step = async {
                match next_payload(&mut source).await {
                    Ok(Some(data)) => match sink.write_all(&data).await {
                        Ok(()) => Step::Forwarded(data.len()),
                        Err(e) => Step::End(StreamEnd::WriteFailed(e.to_string())),
                    },
                    Ok(None) => Step::End(StreamEnd::Eof),
                    Err(e) => Step::End(StreamEnd::ReadFailed(e.to_string())),
                }
            } => step,
        };

        match step {
            Step::Forwarded(n) => bytes += n as u64,
            Step::End(end) => break end,
        }
    };

    let _ = tokio::time::timeout(CLOSE_GRACE, sink.shutdown()).await;
    debug!(direction = %Direction::ClientToBackend, bytes, end = ?end, "pump finished");

    PumpReport {
        direction: Direction::ClientToBackend,
        bytes,
        end,
    }
}

/// Copy backend bytes to the client, one binary message per read.
pub async fn backend_to_client<R, W>(
    mut source: R,
    mut sink: W,
    mut close_rx: watch::Receiver<bool>,
) -> PumpReport
where
    R: AsyncRead + Unpin,
    W: Sink<Message, Error = WsError> + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut bytes = 0u64;

    let end = loop {
        let step = tokio::select! {
            _ = close_requested(&mut close_rx) => Step::End(StreamEnd::Closed),
            step = async {
                match source.read(&mut buf).await {
                    Ok(0) => Step::End(StreamEnd::Eof),
                    Ok(n) => match sink.send(Message::Binary(buf[..n].to_vec().into())).await {
                        Ok(()) => Step::Forwarded(n),
                        Err(e) => Step::End(StreamEnd::WriteFailed(e.to_string())),
                    },
                    Err(e) => Step::End(StreamEnd::ReadFailed(e.to_string())),
                }
            } => step,
        };

        match step {
            Step::Forwarded(n) => bytes += n as u64,
            Step::End(end) => break end,
        }
    };

    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
    debug!(direction = %Direction::BackendToClient, bytes, end = ?end, "pump finished");

    PumpReport {
        direction: Direction::BackendToClient,
        bytes,
        end,
    }
}
