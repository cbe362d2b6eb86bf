//! Authorization gate for the client->backend direction.
//!
//! The gate reads client messages until one starts with `CONNECT `. Messages
//! without the prefix are dropped, never forwarded. The first prefixed
//! message decides the session: its token goes to the [`Authorizer`], and
//! the message itself is consumed by the gate, not relayed. Callers bound
//! the whole gate with the handshake timeout.

use crate::auth::{AuthDecision, Authorizer};
use crate::error::{RelayError, RelayResult};
use crate::handshake::{self, Inspection};
use crate::pump::next_payload;
use futures_util::Stream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info};

/// Wait for a handshake on `source` and ask `authorizer` about it.
///
/// `Ok(())` means the client may proceed; any error is a rejection and the
/// session must not forward a single byte.
pub async fn authorize_client<R>(
    source: &mut R,
    authorizer: &dyn Authorizer,
    max_handshake_size: usize,
) -> RelayResult<()>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut dropped = 0usize;

    loop {
        let message = next_payload(source)
            .await?
            .ok_or_else(|| RelayError::Denied("client closed before handshake".into()))?;

        let (token, client_name) = match handshake::inspect(&message, max_handshake_size)? {
            Inspection::Unrecognized => {
                dropped += 1;
                debug!(len = message.len(), dropped, "dropping message received before handshake");
                continue;
            }
            Inspection::Token { token, client_name } => (token, client_name),
        };

        debug!(client_name = ?client_name, "handshake received, checking token");
        return match authorizer.authorize(&token).await {
            AuthDecision::Authorized => {
                info!(client_name = ?client_name, "client authorized");
                Ok(())
            }
            AuthDecision::Rejected => Err(RelayError::Denied("client not authorized".into())),
            AuthDecision::Indeterminate(e) => Err(e),
        };
    }
}
