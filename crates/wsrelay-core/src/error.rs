use thiserror::Error;

/// Errors produced by the relay core.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("dial error: {0}")]
    Dial(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("access denied: {0}")]
    Denied(String),

    #[error("authorization service error: {0}")]
    AuthService(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::AuthService(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
