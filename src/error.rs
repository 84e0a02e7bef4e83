use std::time::Duration;

/// Failure of a single protocol exchange.
///
/// Sub-protocol handlers turn these into the matching textual reply. Fatal
/// errors (see [`SessionError::is_fatal`]) also end the session, since the
/// byte stream can no longer be trusted.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("stream out of sync: {0}")]
    Framing(String),

    #[error("name already in use: {0}")]
    Conflict(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("transfer failed: {0}")]
    Transfer(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to persist state: {0:#}")]
    Persist(#[from] anyhow::Error),
}

impl SessionError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        SessionError::Protocol(msg.into())
    }

    pub fn framing(msg: impl Into<String>) -> Self {
        SessionError::Framing(msg.into())
    }

    /// Turn a failure in the middle of an outgoing stream into a fatal one.
    pub fn abort_stream(self) -> Self {
        if self.is_fatal() {
            self
        } else {
            SessionError::Framing(format!("stream aborted: {}", self))
        }
    }

    /// True when the session cannot continue on this connection.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Timeout(_) | SessionError::Framing(_) => true,
            SessionError::Transfer(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
