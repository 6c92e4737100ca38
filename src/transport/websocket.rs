//! WebSocket transport for camera frame streams

use crate::transport::traits::{FrameStream, StreamConnector};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

/// WebSocket stream wrapper implementing FrameStream
pub struct WsFrameStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsFrameStream {
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { inner: stream }
    }
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> Option<Result<Bytes>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(Bytes::from(data))),
                Ok(Message::Close(frame)) => {
                    debug!("Server sent close frame: {:?}", frame);
                    return None;
                }
                Ok(Message::Text(text)) => {
                    debug!("Ignoring text message ({} bytes)", text.len());
                }
                // ping/pong are answered by tungstenite itself
                Ok(_) => {}
                Err(WsError::ConnectionClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self.inner.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// WebSocket connector for `ws://` and `wss://` stream addresses
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    type Stream = WsFrameStream;

    async fn connect(&self, url: &Url) -> Result<Self::Stream> {
        let (stream, response) = connect_async(url.as_str()).await?;
        debug!("WebSocket handshake with {} -> {}", url, response.status());
        Ok(WsFrameStream::new(stream))
    }

    fn name(&self) -> &'static str {
        "WebSocket"
    }
}
