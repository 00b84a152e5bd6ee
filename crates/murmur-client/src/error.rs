use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the REST API.
#[derive(Debug, Error)]
pub enum TransportError {
    /// 401/403: the session is gone and the user has to log in again.
    #[error("server rejected the session ({0})")]
    Forbidden(StatusCode),

    #[error("not logged in")]
    NotAuthenticated,

    #[error("unexpected response status {0}")]
    Status(StatusCode),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl TransportError {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Forbidden(status),
            _ => Self::Status(status),
        }
    }

    /// True when the caller should drop the session rather than retry.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_) | Self::NotAuthenticated)
    }
}

/// Failures on the push connection. These never leave the channel's
/// reconnect loop; they are logged and turned into a `Disconnected` state.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("not a websocket url: {0}")]
    InvalidUrl(String),
}
