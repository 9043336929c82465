use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::SyncError;
use crate::models::{ClientMessage, ServerMessage};

/// One open link to an authority
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), SyncError>;

    /// Next authority message, or `None` once the link is closed
    async fn recv(&mut self) -> Result<Option<ServerMessage>, SyncError>;

    async fn close(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    async fn connect(&self, address: &str) -> Result<Self::Conn, SyncError>;
}

/// Maps a session code to the address of the authority hosting it.
///
/// `None` asks for an authority that will host a new session.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, code: Option<&str>) -> Result<String, SyncError>;
}

/// Every session lives behind the same WebSocket endpoint
#[derive(Debug, Clone)]
pub struct UrlResolver {
    base_url: String,
}

impl UrlResolver {
    /// `base_url` like `ws://127.0.0.1:8080`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SessionResolver for UrlResolver {
    async fn resolve(&self, _code: Option<&str>) -> Result<String, SyncError> {
        Ok(format!("{}/ws", self.base_url))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&self, address: &str) -> Result<WsConnection, SyncError> {
        let (stream, _) = connect_async(address)
            .await
            .map_err(|e| SyncError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Connected to {}", address);
        Ok(WsConnection { stream })
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), SyncError> {
        let payload = serde_json::to_string(message)?;
        self.stream
            .send(Message::text(payload))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<ServerMessage>, SyncError> {
        while let Some(frame) = self.stream.next().await {
            match frame.map_err(|e| SyncError::Transport(e.to_string()))? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
                Message::Close(reason) => {
                    debug!("Authority closed the link: {:?}", reason);
                    return Ok(None);
                }
                Message::Binary(_) => warn!("Ignoring binary frame"),
                // ping replies are handled by the stream
                _ => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))
    }
}
