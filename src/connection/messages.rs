//! Push Message Types
//!
//! Decoding of the Engine.IO v4 / Socket.IO text framing spoken by the
//! campus push endpoint, and the event type handed to subscribers.
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,..}   open (server)
//! 40                                      namespace connect (both ways)
//! 42["update_parking",{..}]               event
//! 2 / 3                                   ping (server) / pong (client)
//! 1, 41                                   close / namespace disconnect
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TransportError;
use crate::model::Domain;

/// Namespace connect request sent once the transport is open
pub const CONNECT_PACKET: &str = "40";

/// Reply to a server heartbeat
pub const PONG_PACKET: &str = "3";

/// Handshake data carried by the Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// One decoded text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    /// Namespace connected (`40`)
    Connected,
    /// Namespace disconnected by the server (`41`)
    Disconnected,
    /// Namespace connection refused (`44`)
    ConnectError(String),
    /// Named event with its first argument, if any
    Event { name: String, payload: Value },
    /// Packets this client has no use for (acks, upgrade, noop)
    Ignored,
}

/// Decode one WebSocket text message
pub fn decode_frame(text: &str) -> Result<Frame, TransportError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| TransportError::Protocol("empty frame".to_string()))?;
    let rest = chars.as_str();

    match kind {
        '0' => serde_json::from_str(rest)
            .map(Frame::Open)
            .map_err(|e| TransportError::Protocol(format!("bad open packet: {}", e))),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => decode_socket_packet(rest),
        '5' | '6' => Ok(Frame::Ignored),
        other => Err(TransportError::Protocol(format!(
            "unknown packet type '{}'",
            other
        ))),
    }
}

/// Decode the Socket.IO packet inside an Engine.IO message
fn decode_socket_packet(text: &str) -> Result<Frame, TransportError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| TransportError::Protocol("empty message packet".to_string()))?;
    let body = skip_namespace(chars.as_str());

    match kind {
        '0' => Ok(Frame::Connected),
        '1' => Ok(Frame::Disconnected),
        '2' => decode_event(body),
        '4' => Ok(Frame::ConnectError(body.to_string())),
        '3' | '5' | '6' => Ok(Frame::Ignored),
        other => Err(TransportError::Protocol(format!(
            "unknown socket packet type '{}'",
            other
        ))),
    }
}

/// Strip an optional `/namespace,` prefix
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn decode_event(body: &str) -> Result<Frame, TransportError> {
    // optional ack id before the argument array
    let args = body.trim_start_matches(|c: char| c.is_ascii_digit());

    let mut values: Vec<Value> = serde_json::from_str(args)
        .map_err(|e| TransportError::Protocol(format!("bad event arguments: {}", e)))?;
    if values.is_empty() {
        return Err(TransportError::Protocol("event without a name".to_string()));
    }

    let name = match values.remove(0) {
        Value::String(name) => name,
        _ => return Err(TransportError::Protocol("event name is not a string".to_string())),
    };
    let payload = if values.is_empty() {
        Value::Null
    } else {
        values.swap_remove(0)
    };

    Ok(Frame::Event { name, payload })
}

/// A domain update notification delivered to subscribers
///
/// The payload is kept for logging only; handlers always re-fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushEvent {
    pub domain: Domain,
    pub name: String,
    pub payload: Value,
    /// Receive time (Unix milliseconds)
    pub received_at: i64,
}

impl PushEvent {
    /// Build an event from a raw event name, if it names a known domain
    pub fn from_raw(name: &str, payload: Value, received_at: i64) -> Option<Self> {
        Domain::from_event_name(name).map(|domain| Self {
            domain,
            name: name.to_string(),
            payload,
            received_at,
        })
    }
}
