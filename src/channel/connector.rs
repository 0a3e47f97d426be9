//! Duplex stream establishment.
//!
//! The channel only ever sees text frames and a close marker. [`WsConnector`]
//! adapts a tokio-tungstenite socket to that shape; tests substitute an
//! in-memory connector.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::ready;
use futures::{Sink, SinkExt, Stream, StreamExt};
use reqwest::Url;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::errors::ChannelError;

/// One inbound frame as the channel cares about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// The peer closed the stream, with `"<code> <reason>"` when it gave one.
    Close(Option<String>),
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ChannelError>> + Send>>;

/// An open duplex stream, split into its two halves.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens a [`Link`] to a fully-built connection URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Link, ChannelError>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Link, ChannelError> {
        debug!(host = url.host_str().unwrap_or(""), path = url.path(), "Opening websocket");
        let (socket, response) =
            tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    ChannelError::Connect(format!(
                        "timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ))
                })?
                .map_err(|e| ChannelError::Connect(e.to_string()))?;
        debug!(status = response.status().as_u16(), "Websocket handshake complete");

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| ChannelError::Stream(e.to_string()))
            .with(|text: String| ready(Ok::<_, ChannelError>(Message::Text(text))));

        let stream = read.filter_map(|item| {
            ready(match item {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
                Ok(Message::Close(frame)) => Some(Ok(Frame::Close(
                    frame.map(|f| format!("{} {}", u16::from(f.code), f.reason).trim().to_string()),
                ))),
                // Ping/pong are answered by tungstenite; binary frames carry nothing for us
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::Stream(e.to_string()))),
            })
        });

        Ok(Link::new(Box::pin(sink), Box::pin(stream)))
    }
}
