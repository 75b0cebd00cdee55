#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use crate::ws::correlator::RequestId;
use crate::ws::key::WsKey;
use crate::ws::operation::Operation;

/// An error reported by the exchange for a single request.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationError {
    pub key: WsKey,
    pub id: RequestId,
    /// HTTP-like status, absent on stream-control acknowledgements
    pub status: Option<u16>,
    pub code: Option<i64>,
    pub message: String,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request {} on {} failed", self.id, self.key)?;
        if let Some(status) = self.status {
            write!(f, " with status {status}")?;
        }
        if let Some(code) = self.code {
            write!(f, " (code {code})")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl StdError for OperationError {}

/// Failures of a connection, a session or a single WS-API request.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Transport failure while opening or using a socket
    Connection(tokio_tungstenite::tungstenite::Error),
    /// A frame or payload that is not valid JSON for its type
    MessageParse(serde_json::Error),
    /// Received an invalid or unexpected message
    InvalidMessage(String),
    /// Subscription request was rejected locally
    SubscriptionFailed(String),
    /// The operation cannot be sent on this connection
    UnsupportedOperationForConnection { key: WsKey, operation: Operation },
    /// The operation needs an authenticated session that does not exist
    NotAuthenticated { key: WsKey },
    /// `session.logon` or its verification failed
    AuthenticationFailed {
        key: WsKey,
        code: Option<i64>,
        message: String,
    },
    /// The connection was lost while the request was in flight
    ConnectionReset { key: WsKey },
    /// The connection was closed by the caller
    ConnectionClosed { key: WsKey },
    /// Reconnection attempts were exhausted
    ConnectionUnavailable { key: WsKey, attempts: u32 },
    /// No response arrived within the request timeout
    RequestTimeout {
        key: WsKey,
        id: RequestId,
        operation: Operation,
    },
    /// The exchange answered with an error
    Operation(OperationError),
    /// A topic could not be restored after a reconnect and was dropped
    ResubscriptionFailed {
        key: WsKey,
        topic: String,
        reason: String,
    },
    /// Subscription stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
}

impl WsError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Resets, timeouts and unavailable connections are transient; an explicit close, a
    /// rejected operation or a local validation failure is not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::ConnectionReset { .. }
                | Self::ConnectionUnavailable { .. }
                | Self::RequestTimeout { .. }
                | Self::AuthenticationFailed { .. }
                | Self::Lagged { .. }
        )
    }

    /// The connection this error belongs to, if any.
    #[must_use]
    pub fn key(&self) -> Option<WsKey> {
        match self {
            Self::UnsupportedOperationForConnection { key, .. }
            | Self::NotAuthenticated { key }
            | Self::AuthenticationFailed { key, .. }
            | Self::ConnectionReset { key }
            | Self::ConnectionClosed { key }
            | Self::ConnectionUnavailable { key, .. }
            | Self::RequestTimeout { key, .. }
            | Self::ResubscriptionFailed { key, .. } => Some(*key),
            Self::Operation(e) => Some(e.key),
            _ => None,
        }
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::InvalidMessage(msg) => write!(f, "Invalid WebSocket message: {msg}"),
            Self::SubscriptionFailed(reason) => write!(f, "Subscription failed: {reason}"),
            Self::UnsupportedOperationForConnection { key, operation } => {
                write!(f, "Operation {operation} is not supported on connection {key}")
            }
            Self::NotAuthenticated { key } => {
                write!(f, "Connection {key} has no authenticated session")
            }
            Self::AuthenticationFailed { key, code, message } => match code {
                Some(code) => write!(
                    f,
                    "Authentication on {key} failed (code {code}): {message}"
                ),
                None => write!(f, "Authentication on {key} failed: {message}"),
            },
            Self::ConnectionReset { key } => {
                write!(f, "Connection {key} was reset while the request was pending")
            }
            Self::ConnectionClosed { key } => write!(f, "Connection {key} was closed"),
            Self::ConnectionUnavailable { key, attempts } => write!(
                f,
                "Connection {key} is unavailable after {attempts} reconnection attempts"
            ),
            Self::RequestTimeout { key, id, operation } => {
                write!(f, "Request {id} ({operation}) on {key} timed out")
            }
            Self::Operation(e) => e.fmt(f),
            Self::ResubscriptionFailed { key, topic, reason } => {
                write!(f, "Failed to restore {topic} on {key}: {reason}")
            }
            Self::Lagged { count } => write!(f, "Subscription lagged, missed {count} messages"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for WsError {
    fn from(e: serde_json::Error) -> Self {
        Self::MessageParse(e)
    }
}

impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
