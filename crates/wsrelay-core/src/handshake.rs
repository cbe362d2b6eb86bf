//! Handshake payload recognition.
//!
//! A client that wants to be authorized sends, as its first recognised
//! message, the literal prefix `CONNECT ` followed by a JSON object:
//!
//! ```text
//! CONNECT {"auth_token":"abc123","name":"web-client"}
//! ```
//!
//! Only `auth_token` is required. Unknown fields are ignored so clients may
//! send their full connect options unchanged.

use crate::error::{RelayError, RelayResult};
use serde::Deserialize;
use std::fmt;

/// Literal prefix marking a handshake message (case-sensitive).
pub const CONNECT_PREFIX: &[u8] = b"CONNECT ";

/// Largest handshake message the gate will inspect.
pub const MAX_HANDSHAKE_SIZE: usize = 32 * 1024;

/// JSON body of a handshake message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakePayload {
    /// Bearer token forwarded to the authorization service.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Optional client name, used only for logging.
    #[serde(default)]
    pub name: Option<String>,
}

/// Opaque bearer token extracted from a handshake payload.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

/// What the gate learned from one client message.
#[derive(Debug, PartialEq, Eq)]
pub enum Inspection {
    /// The message does not start with [`CONNECT_PREFIX`]; it is dropped.
    Unrecognized,
    /// A well-formed handshake carrying a token.
    Token {
        token: AuthToken,
        client_name: Option<String>,
    },
}

/// Inspect a single client message for a handshake payload.
///
/// Returns [`Inspection::Unrecognized`] when the prefix is absent. A prefixed
/// message that is oversized, is not a JSON object, or lacks a string
/// `auth_token` is an error; the caller rejects the session.
pub fn inspect(message: &[u8], max_size: usize) -> RelayResult<Inspection> {
    let Some(body) = message.strip_prefix(CONNECT_PREFIX) else {
        return Ok(Inspection::Unrecognized);
    };

    if message.len() > max_size {
        return Err(RelayError::Handshake(format!(
            "handshake too large: {} bytes (max {max_size})",
            message.len()
        )));
    }

    let payload: HandshakePayload = serde_json::from_slice(body)
        .map_err(|e| RelayError::Handshake(format!("malformed payload: {e}")))?;

    match payload.auth_token {
        Some(token) => Ok(Inspection::Token {
            token: AuthToken(token),
            client_name: payload.name,
        }),
        None => Err(RelayError::Handshake("missing auth_token".into())),
    }
}
