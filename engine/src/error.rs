//! Error types, split the way the failures behave: transport errors are
//! recoverable and absorbed by backoff/reconciliation, domain errors
//! propagate synchronously to the requester.

use std::time::Duration;
use thiserror::Error;

/// Session-level failures. None of these crash the engine; callers either
/// back off or defer the repair to the reconciliation sweeper.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The socket dropped with the request in flight. The command may or
    /// may not have executed.
    #[error("connection lost before a response arrived")]
    ConnectionLost,
    /// No response within the window. Unknown outcome: never blind-retry,
    /// the reconciliation sweeper repairs any divergence.
    #[error("no response within {0:?}")]
    CommandTimeout(Duration),
    /// The session was closed while the request was pending.
    #[error("session closed")]
    Cancelled,
    #[error("not connected")]
    NotConnected,
    #[error("malformed response payload: {0}")]
    Codec(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Domain-level outcomes of zone requests. Validation failures perform no
/// mutation at all.
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("owner already has an active zone on this server")]
    DuplicateZone,
    #[error("zones are disabled on this server")]
    ServerDisabled,
    #[error("no zone registered for this owner")]
    NotFound,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_render_for_operators() {
        let timeout = TransportError::CommandTimeout(Duration::from_secs(7));
        assert!(timeout.to_string().contains("7s"));
        assert_eq!(
            TransportError::ConnectionLost.to_string(),
            "connection lost before a response arrived"
        );
    }

    #[test]
    fn zone_error_wraps_transport_transparently() {
        let err: ZoneError = TransportError::NotConnected.into();
        assert_eq!(err.to_string(), "not connected");
    }
}
