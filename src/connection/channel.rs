//! Push channel abstraction and its Socket.IO implementation
//!
//! A [`PushChannel`] yields connection state changes and raw named events.
//! Reconnection is the channel's own business: [`SocketIoChannel`] reopens
//! the WebSocket after a capped exponential delay and keeps yielding.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

use super::messages::{decode_frame, Frame, CONNECT_PACKET, PONG_PACKET};
use super::TransportError;
use crate::config::PushConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a push channel reports
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Event { name: String, payload: Value },
}

/// Source of push notifications
#[async_trait]
pub trait PushChannel: Send {
    /// Wait for the next event
    ///
    /// `Some(Err(_))` reports a transport problem; the channel stays usable.
    /// `None` means the channel was closed and will not yield again.
    async fn next_event(&mut self) -> Option<Result<ChannelEvent, TransportError>>;

    /// Close the channel for good
    async fn close(&mut self);
}

/// Capped exponential reconnect delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay before reconnect attempt number `failures` (1-based)
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures.saturating_sub(1).min(16));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Socket.IO client over a WebSocket transport
pub struct SocketIoChannel {
    url: String,
    backoff: Backoff,
    ws: Option<WsStream>,
    /// Namespace connect acknowledged on the current socket
    connected: bool,
    /// Consecutive failed or dropped connections
    failures: u32,
    /// Silence allowed between server packets, from the open handshake
    read_deadline: Option<Duration>,
    closed: bool,
}

impl SocketIoChannel {
    pub fn new(url: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            url: url.into(),
            backoff,
            ws: None,
            connected: false,
            failures: 0,
            read_deadline: None,
            closed: false,
        }
    }

    pub fn from_config(config: &PushConfig) -> Self {
        Self::new(
            config.url.clone(),
            Backoff::new(config.reconnect_delay(), config.max_reconnect_delay()),
        )
    }

    /// Forget the current socket, reporting a disconnect if it was connected
    fn drop_socket(&mut self, reason: String) -> Result<ChannelEvent, TransportError> {
        self.ws = None;
        self.read_deadline = None;
        self.failures = self.failures.saturating_add(1);
        if std::mem::take(&mut self.connected) {
            Ok(ChannelEvent::Disconnected { reason })
        } else {
            Err(TransportError::Closed(reason))
        }
    }

    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        match self.ws.as_mut() {
            Some(ws) => ws
                .send(Message::Text(text.to_string().into()))
                .await
                .map_err(|e| TransportError::WebSocket(e.to_string())),
            None => Err(TransportError::Closed("not connected".to_string())),
        }
    }
}

#[async_trait]
impl PushChannel for SocketIoChannel {
    async fn next_event(&mut self) -> Option<Result<ChannelEvent, TransportError>> {
        loop {
            if self.closed {
                return None;
            }
            let deadline = self.read_deadline;

            let Some(ws) = self.ws.as_mut() else {
                let delay = self.backoff.delay(self.failures);
                if !delay.is_zero() {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                    tokio::time::sleep(delay).await;
                }

                tracing::info!(url = %self.url, "Connecting to push channel");
                match connect_async(self.url.as_str()).await {
                    Ok((ws, _)) => {
                        self.ws = Some(ws);
                        continue;
                    }
                    Err(e) => {
                        self.failures = self.failures.saturating_add(1);
                        return Some(Err(TransportError::Connect(e.to_string())));
                    }
                }
            };

            // the server pings every interval; silence past interval + timeout is a dead socket
            let message = match deadline {
                Some(limit) => tokio::time::timeout(limit, ws.next()).await.ok(),
                None => Some(ws.next().await),
            };
            let Some(message) = message else {
                tracing::warn!(url = %self.url, "No packet within the ping deadline");
                return Some(self.drop_socket("ping timeout".to_string()));
            };
            let frame = match message {
                Some(Ok(Message::Text(text))) => decode_frame(&text),
                Some(Ok(Message::Close(_))) | None => {
                    return Some(self.drop_socket("socket closed".to_string()));
                }
                // tungstenite answers websocket-level pings itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(self.drop_socket(e.to_string())),
            };

            match frame {
                Ok(Frame::Open(open)) => {
                    tracing::debug!(sid = %open.sid, "Transport open, joining namespace");
                    if open.ping_interval > 0 {
                        self.read_deadline = Some(Duration::from_millis(
                            open.ping_interval.saturating_add(open.ping_timeout),
                        ));
                    }
                    if let Err(e) = self.send_text(CONNECT_PACKET).await {
                        self.drop_socket(e.to_string()).ok();
                        return Some(Err(e));
                    }
                }
                Ok(Frame::Ping) => {
                    if let Err(e) = self.send_text(PONG_PACKET).await {
                        return Some(self.drop_socket(e.to_string()));
                    }
                }
                Ok(Frame::Connected) => {
                    self.connected = true;
                    self.failures = 0;
                    return Some(Ok(ChannelEvent::Connected));
                }
                Ok(Frame::Event { name, payload }) => {
                    return Some(Ok(ChannelEvent::Event { name, payload }));
                }
                Ok(Frame::Close) | Ok(Frame::Disconnected) => {
                    return Some(self.drop_socket("server closed the session".to_string()));
                }
                Ok(Frame::ConnectError(message)) => {
                    self.drop_socket(message.clone()).ok();
                    return Some(Err(TransportError::Protocol(format!(
                        "namespace refused: {}",
                        message
                    ))));
                }
                Ok(Frame::Pong) | Ok(Frame::Ignored) => continue,
                // a bad frame does not poison the socket
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.connected = false;
        self.read_deadline = None;
        if let Some(mut ws) = self.ws.take() {
            if let Err(e) = ws.close(None).await {
                tracing::debug!(error = %e, "Error closing push socket");
            }
        }
    }
}
