//! Transport layer carrying raw MQTT bytes
//!
//! The [`FrameTransport`] trait abstracts the WebSocket connection so the
//! device runtime can be driven by a mock in tests. One transport message
//! carries one MQTT control packet.

use std::time::Duration;
use thiserror::Error;

pub mod mqtt;
pub mod websocket;

pub use websocket::WebSocketTransport;

/// Events surfaced by an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Binary message received from the broker
    Data(Vec<u8>),
    /// Connection closed, with the peer's close reason when one was given
    Closed(Option<String>),
    /// Read failure; the transport is no longer open
    Error(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),
    #[error("Opening handshake did not complete within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Transport is not open")]
    NotOpen,
}

/// Bidirectional binary message channel to the broker
#[async_trait::async_trait]
pub trait FrameTransport: Send {
    /// Open the connection; bounded by the implementation's connect timeout
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Send one binary message. A failure leaves the transport closed.
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next inbound event
    ///
    /// Never resolves while the transport is closed, so it can sit in a
    /// `select!` next to timers unconditionally. Must be cancel safe.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close the connection if open; idempotent
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}
