//! Push Notifications
//!
//! Receives "domain X changed" notifications from the campus backend.
//!
//! ## Architecture
//!
//! - **ConnectionManager**: owns the single channel, runs subscribed handlers
//!   and exposes the connection state through a watch channel
//! - **PushChannel**: the transport seam; [`SocketIoChannel`] speaks
//!   Socket.IO over WebSocket and reconnects with capped exponential delay
//! - **Messages**: Engine.IO / Socket.IO frame decoding
//!
//! Delivery is at-least-once and unordered, and payloads are not trusted:
//! a handler only learns *which* domain changed and re-fetches it. Channel
//! errors are logged and never reach the refresh pipeline.

mod channel;
mod error;
mod manager;
mod messages;

pub use channel::{Backoff, ChannelEvent, PushChannel, SocketIoChannel};
pub use error::TransportError;
pub use manager::{ConnectionManager, ConnectionState, EventHandler, SubscriptionId};
pub use messages::{decode_frame, Frame, OpenHandshake, PushEvent, CONNECT_PACKET, PONG_PACKET};
