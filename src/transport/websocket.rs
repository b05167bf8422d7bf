//! WebSocket (ws/wss) transport negotiating the `mqtt` subprotocol

use super::{FrameTransport, TransportError, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

/// Subprotocol required by MQTT-over-WebSocket brokers
pub const MQTT_SUBPROTOCOL: &str = "mqtt";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
    stream: Option<WsStream>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            stream: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl FrameTransport for WebSocketTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.close().await;

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(MQTT_SUBPROTOCOL),
        );

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))?
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        debug!(
            url = %self.url,
            status = %response.status(),
            "WebSocket handshake complete"
        );
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;

        if let Err(e) = stream.send(Message::Binary(frame.to_vec())).await {
            self.stream = None;
            return Err(TransportError::SendFailed(e.to_string()));
        }
        trace!(bytes = frame.len(), "Frame sent");
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return std::future::pending().await;
            };

            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return TransportEvent::Data(data),
                Some(Ok(Message::Close(frame))) => {
                    self.stream = None;
                    return TransportEvent::Closed(frame.map(|f| f.reason.to_string()));
                }
                Some(Ok(Message::Text(text))) => {
                    warn!(length = text.len(), "Ignoring text message on MQTT transport");
                }
                // Pings are answered by tungstenite on the next read or write
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.stream = None;
                    return TransportEvent::Error(e.to_string());
                }
                None => {
                    self.stream = None;
                    return TransportEvent::Closed(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "WebSocket close did not complete cleanly");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
