use std::time::Duration;

use crate::errors::TransportError;
use crate::transport::ResponseMeta;

/// Lifecycle notifications of a persistent stream, in emission order.
///
/// `attempt` is the sequence number of the connection attempt the event
/// belongs to. Events of superseded attempts are never emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting { attempt: u64 },
    Response { attempt: u64, meta: ResponseMeta },
    /// Any failure of the request or of its open stream.
    RequestError { attempt: u64, error: TransportError },
    /// Only for failures where the peer itself answered with an error.
    Error { attempt: u64, error: TransportError },
    Close { attempt: u64 },
    Reconnecting { delay: Duration, probing: bool },
    /// A scheduled reconnection fired and is about to connect.
    Reconnect,
    Abort,
    Destroy,
}

impl ConnectionEvent {
    /// Wire-style event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Response { .. } => "response",
            Self::RequestError { .. } => "request:error",
            Self::Error { .. } => "error",
            Self::Close { .. } => "close",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Reconnect => "reconnect",
            Self::Abort => "abort",
            Self::Destroy => "destroy",
        }
    }

    pub fn attempt(&self) -> Option<u64> {
        match self {
            Self::Connecting { attempt }
            | Self::Response { attempt, .. }
            | Self::RequestError { attempt, .. }
            | Self::Error { attempt, .. }
            | Self::Close { attempt } => Some(*attempt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(ConnectionEvent::Connecting { attempt: 1 }.name(), "connecting");
        assert_eq!(
            ConnectionEvent::RequestError { attempt: 1, error: TransportError::Cancelled }.name(),
            "request:error"
        );
        assert_eq!(ConnectionEvent::Reconnect.name(), "reconnect");
        assert_eq!(ConnectionEvent::Destroy.name(), "destroy");
    }

    #[test]
    fn attempt_only_for_attempt_scoped_events() {
        assert_eq!(ConnectionEvent::Close { attempt: 3 }.attempt(), Some(3));
        let reconnecting = ConnectionEvent::Reconnecting { delay: Duration::ZERO, probing: false };
        assert_eq!(reconnecting.attempt(), None);
        assert_eq!(ConnectionEvent::Abort.attempt(), None);
    }
}
