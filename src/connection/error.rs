//! Push channel error types

use thiserror::Error;

/// Errors raised by the push channel
///
/// None of these are fatal: the channel reconnects on its own and missed
/// events are covered by the next poll tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the WebSocket failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Read or write on an open socket failed
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A frame could not be understood
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The socket went away before the session was established
    #[error("Connection closed: {0}")]
    Closed(String),
}
