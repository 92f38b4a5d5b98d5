use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid listen address: {0:?}")]
    InvalidListenAddr(String),

    #[error("invalid remote URL {url:?}: {reason}")]
    InvalidRemoteUrl { url: String, reason: String },

    #[error("WebSocket connect failed: {0}")]
    ConnectFailed(#[source] tungstenite::Error),

    #[error("WebSocket upgrade rejected: HTTP {status}")]
    ConnectHttpFailed { status: http::StatusCode },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Splits a handshake error into the transport-level and HTTP-level
    /// cases. An `Error::Http` means the remote answered but refused the
    /// upgrade; everything else (DNS, refused, TLS) is a transport failure.
    pub fn from_handshake(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => ProxyError::ConnectHttpFailed {
                status: response.status(),
            },
            other => ProxyError::ConnectFailed(other),
        }
    }

    pub fn is_http_rejection(&self) -> bool {
        matches!(self, ProxyError::ConnectHttpFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
