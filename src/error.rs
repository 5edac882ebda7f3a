//! Errors surfaced by client operations.

use thiserror::Error;

/// Everything a public client operation can fail with.
///
/// Command rejections carry the `msg-id` of the rejecting NOTICE verbatim
/// (`already_banned`, `usage_slow_on`, ...) so callers can match on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// An operation was attempted while the connection was not open and ready.
    #[error("Not connected to server.")]
    NotConnected,

    /// The WebSocket connection could not be established.
    #[error("Unable to connect.")]
    UnableToConnect,

    /// The connection closed while the operation was outstanding.
    #[error("Connection closed.")]
    ConnectionClosed,

    /// The server rejected the login during the handshake. Carries the
    /// NOTICE text verbatim ("Login authentication failed.", ...).
    #[error("{0}")]
    Login(String),

    /// A correlated command saw no identifiable response before its deadline.
    #[error("No response from Twitch.")]
    NoResponse,

    /// A multi-channel join was not confirmed for every channel in time.
    #[error("Could not join channel(s): {}", .0.join(", "))]
    JoinTimeout(Vec<String>),

    /// The server rejected a command; the payload is the `msg-id` of the
    /// rejecting NOTICE.
    #[error("{0}")]
    Rejected(String),

    /// Invalid arguments, detected before anything was transmitted.
    #[error("{0}")]
    Usage(String),
}
