//! Error types for the bot link.
//!
//! [`LinkError`] covers everything a caller of the link can observe: sends
//! attempted while offline, correlated calls that ran out of time, malformed
//! frames and transport failures. [`HandlerError`] is what exec handlers
//! return; the dispatcher logs it and never lets it escape.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced by the link core.
#[derive(Error, Debug)]
pub enum LinkError {
    /// A frame was sent while no authenticated socket was open.
    #[error("not connected to the bot backend")]
    NotConnected,
    /// A correlated call received no response before its deadline.
    #[error("request {operation} ({callback_id}) timed out after {timeout:?}")]
    Timeout {
        operation: String,
        callback_id: String,
        timeout: Duration,
    },
    /// An inbound frame could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A handler failed while processing an exec operation.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),
    /// The waiter for a correlated call was dropped without a response.
    ///
    /// Losing the connection does not do this: pending calls survive a
    /// reconnect and end with either their response or [`LinkError::Timeout`].
    #[error("request {0} was abandoned before a response arrived")]
    Abandoned(String),
    /// The websocket transport failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// A payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LinkError {
    /// Returns true for failures of the connection itself (refused, reset,
    /// closed before or during a session).
    ///
    /// The supervisory loop grows its backoff only for these; every other
    /// error gets a short fixed pause instead.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            LinkError::NotConnected => true,
            LinkError::WebSocket(e) => matches!(
                e,
                tungstenite::Error::Io(_)
                    | tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Protocol(
                        tungstenite::error::ProtocolError::ResetWithoutClosingHandshake
                            | tungstenite::error::ProtocolError::HandshakeIncomplete
                    )
            ),
            _ => false,
        }
    }
}

/// Errors returned by exec handlers.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler could not complete its work.
    #[error("{0}")]
    Failed(String),
    /// A field the handler needs was absent from the exec payload.
    #[error("missing field `{0}` in exec payload")]
    MissingField(String),
    /// Responding to the backend (or calling it) failed.
    #[error("link failure: {0}")]
    Link(Box<LinkError>),
}

impl From<LinkError> for HandlerError {
    fn from(err: LinkError) -> Self {
        HandlerError::Link(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn refused_connections_count_as_connection_failures() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = LinkError::WebSocket(tungstenite::Error::Io(refused));
        assert!(err.is_connection_failure());

        assert!(LinkError::WebSocket(tungstenite::Error::ConnectionClosed).is_connection_failure());
        assert!(LinkError::NotConnected.is_connection_failure());
    }

    #[test]
    fn socket_dropped_during_upgrade_counts_as_connection_failure() {
        let err = LinkError::WebSocket(tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::HandshakeIncomplete,
        ));
        assert!(err.is_connection_failure());

        let reset = LinkError::WebSocket(tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        ));
        assert!(reset.is_connection_failure());
    }

    #[test]
    fn protocol_errors_are_unexpected() {
        assert!(!LinkError::Protocol("bad hello".into()).is_connection_failure());
        let url_err = LinkError::WebSocket(tungstenite::Error::Url(
            tungstenite::error::UrlError::NoHostName,
        ));
        assert!(!url_err.is_connection_failure());
    }

    #[test]
    fn handler_error_wraps_link_error() {
        let err: HandlerError = LinkError::NotConnected.into();
        assert_eq!(err.to_string(), "link failure: not connected to the bot backend");
    }
}
