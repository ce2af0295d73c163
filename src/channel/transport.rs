//! Transport seam between the connection manager and the network
//!
//! The manager only needs two things from a connection: somewhere to write
//! text frames and a stream of inbound frames. [`Transport`] opens such a pair;
//! [`TungsteniteTransport`] is the production implementation.

use crate::core::error::TransportError;
use async_trait::async_trait;
use futures::stream::{BoxStream, SplitSink};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

/// Close code for a normal, intentional closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported for a close frame that carries no status
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// One inbound frame, already stripped of transport-level ping/pong
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Stream of inbound frames for one physical connection
pub type FrameStream = BoxStream<'static, Result<TransportFrame, TransportError>>;

/// Write half of a connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Start the close handshake
    async fn close(&mut self, code: u16, reason: String) -> Result<(), TransportError>;
}

/// An open connection, split into its two halves
pub struct TransportConnection {
    pub sink: Box<dyn FrameSink>,
    pub frames: FrameStream,
}

/// Opens physical connections
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &Url) -> Result<TransportConnection, TransportError>;
}

/// WebSocket transport built on tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TungsteniteSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for TungsteniteSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        self.inner
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}

fn map_message(message: Message) -> Option<TransportFrame> {
    match message {
        Message::Text(text) => Some(TransportFrame::Text(text.to_string())),
        Message::Binary(data) => Some(TransportFrame::Binary(data.to_vec())),
        Message::Close(frame) => Some(match frame {
            Some(f) => TransportFrame::Close {
                code: f.code.into(),
                reason: f.reason.to_string(),
            },
            None => TransportFrame::Close {
                code: NO_STATUS_RECEIVED,
                reason: String::new(),
            },
        }),
        // tungstenite answers protocol pings itself
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &Url) -> Result<TransportConnection, TransportError> {
        let (stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Open {
                    endpoint: redacted(url),
                    reason: e.to_string(),
                })?;

        let (write, read) = stream.split();

        let frames = read
            .filter_map(|item| async move {
                match item {
                    Ok(message) => map_message(message).map(Ok),
                    Err(e) => Some(Err(TransportError::Read(e.to_string()))),
                }
            })
            .boxed();

        Ok(TransportConnection {
            sink: Box::new(TungsteniteSink { inner: write }),
            frames,
        })
    }
}

/// The URL without its query string, for logs and errors
pub(crate) fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
