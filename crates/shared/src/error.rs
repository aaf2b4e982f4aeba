//! Error taxonomy for the session engine.
//!
//! Nothing here is fatal to the process: transport failures are
//! recoverable by opening a new session and re-announcing identity;
//! protocol failures are terminal for the one request that caused them.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Send attempted while the connection is closed. The connection
    /// layer drops such sends silently (a documented limitation); this
    /// variant exists for surfaces that must report the condition.
    #[error("not connected")]
    NotConnected,

    /// Server rejected the request as unauthenticated. No retry.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// No matching response arrived within the deadline.
    #[error("timed out waiting for response")]
    Timeout,

    /// Server-reported validation failure, reason verbatim.
    #[error("{0}")]
    Validation(String),

    /// Inbound payload could not be decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// Whether establishing a new connection could help.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(_) | SessionError::NotConnected | SessionError::Timeout
        )
    }
}
