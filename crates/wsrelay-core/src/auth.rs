//! External authorization: a single bearer-token check per session.
//!
//! The relay never decides on its own whether a token is valid. It issues
//! `GET <auth-url>` with `Authorization: Bearer <token>` and expects a JSON
//! body shaped as `{"authorized": <bool>}`.

use crate::error::{RelayError, RelayResult};
use crate::handshake::AuthToken;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one authorization round-trip. Never cached across sessions.
#[derive(Debug)]
pub enum AuthDecision {
    Authorized,
    Rejected,
    /// The service could not be reached or answered with something we
    /// could not interpret. Treated as a rejection by the gate.
    Indeterminate(RelayError),
}

impl AuthDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthDecision::Authorized)
    }
}

/// Something that can turn a bearer token into an [`AuthDecision`].
pub trait Authorizer: Send + Sync {
    fn authorize<'a>(
        &'a self,
        token: &'a AuthToken,
    ) -> Pin<Box<dyn Future<Output = AuthDecision> + Send + 'a>>;
}

/// Response body expected from the authorization service.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    authorized: bool,
}

/// [`Authorizer`] backed by an HTTP endpoint.
pub struct HttpAuthorizer {
    url: reqwest::Url,
    http_client: reqwest::Client,
}

impl HttpAuthorizer {
    /// Build an authorizer for `url`. Each call is bounded by `timeout`.
    pub fn new(url: &str, timeout: Duration) -> RelayResult<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| RelayError::Config(format!("invalid auth url {url:?}: {e}")))?;
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("cannot build http client: {e}")))?;
        Ok(Self { url, http_client })
    }

    async fn check(&self, token: &AuthToken) -> RelayResult<bool> {
        let response = self
            .http_client
            .get(self.url.clone())
            .bearer_auth(token.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::AuthService(format!(
                "authorization endpoint returned {status}"
            )));
        }

        let body: AuthResponse = response.json().await?;
        Ok(body.authorized)
    }
}

impl Authorizer for HttpAuthorizer {
    fn authorize<'a>(
        &'a self,
        token: &'a AuthToken,
    ) -> Pin<Box<dyn Future<Output = AuthDecision> + Send + 'a>> {
        Box::pin(async move {
            match self.check(token).await {
                Ok(true) => {
                    debug!(url = %self.url, "token authorized");
                    AuthDecision::Authorized
                }
                Ok(false) => {
                    debug!(url = %self.url, "token rejected");
                    AuthDecision::Rejected
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "authorization call failed");
                    AuthDecision::Indeterminate(e)
                }
            }
        })
    }
}
