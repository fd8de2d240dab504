use std::time::Duration;

/// Failure reported by a transport while opening or reading a stream.
///
/// Three families matter to the controller:
/// - connecting errors (`Connect`, `Timeout`): the peer could not be reached
/// - `Server`: the peer answered, but with an error status
/// - `Stream`: an open body failed mid-read
///
/// `Cancelled` is never surfaced to callers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("server responded with {status}: {body}")]
    Server { status: u16, body: String },
    #[error("stream failed: {0}")]
    Stream(String),
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True when the peer produced a response. These are the failures that
    /// reach the public `error` event.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    /// HTTP status of a server-level failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short classification string for logging and for event consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) | Self::Timeout(_) => "connecting-error",
            Self::Server { .. } => "server-error",
            Self::Stream(_) => "stream-error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Raised by a liveness probe that considers the peer unreachable.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("probe failed: {0}")]
pub struct ProbeError(pub String);

impl ProbeError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors detected while building a stream or loading its settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}
