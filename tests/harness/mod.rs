//! Shared test harness for connection lifecycle testing
//!
//! Provides `ScriptedTransport`, an in-process `Transport` whose open
//! outcomes are scripted by the test, and `ServerPeer`, the server side of
//! each accepted connection. Combined with paused tokio time this makes the
//! reconnect and heartbeat schedules fully deterministic.
//!
//! # Usage
//!
//! From any integration test file in `tests/`:
//! ```rust,ignore
//! mod harness;
//! use harness::*;
//! ```

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use live::prelude::*;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

/// Generous upper bound for waits; with paused time it costs nothing
pub const WAIT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// What the next `open()` does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse,
    /// Accept once the delay has elapsed
    AcceptAfter(Duration),
}

struct Script {
    queued: VecDeque<Outcome>,
    fallback: Outcome,
    opened: Vec<Url>,
}

struct Shared {
    script: Mutex<Script>,
    peers_tx: mpsc::UnboundedSender<ServerPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerPeer>>,
}

/// In-process transport; clones share the same script
#[derive(Clone)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    /// Every `open()` without a queued outcome resolves to `fallback`
    pub fn new(fallback: Outcome) -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                script: Mutex::new(Script {
                    queued: VecDeque::new(),
                    fallback,
                    opened: Vec::new(),
                }),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Outcome::Accept)
    }

    pub fn refusing() -> Self {
        Self::new(Outcome::Refuse)
    }

    /// Queue outcomes consumed in order before the fallback applies
    pub fn script(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.shared.script.lock().queued.extend(outcomes);
        self
    }

    pub fn push_outcome(&self, outcome: Outcome) {
        self.shared.script.lock().queued.push_back(outcome);
    }

    pub fn set_fallback(&self, outcome: Outcome) {
        self.shared.script.lock().fallback = outcome;
    }

    /// Number of `open()` calls so far, accepted or not
    pub fn open_count(&self) -> usize {
        self.shared.script.lock().opened.len()
    }

    pub fn opened_urls(&self) -> Vec<Url> {
        self.shared.script.lock().opened.clone()
    }

    /// Wait for the next accepted connection
    pub async fn next_peer(&self) -> ServerPeer {
        let mut peers = self.shared.peers_rx.lock().await;
        tokio::time::timeout(WAIT, peers.recv())
            .await
            .expect("Timeout waiting for a connection")
            .expect("Transport dropped")
    }

    /// An accepted connection not yet claimed, if any
    pub fn try_next_peer(&self) -> Option<ServerPeer> {
        self.shared.peers_rx.try_lock().ok()?.try_recv().ok()
    }

    fn accept(&self) -> TransportConnection {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();

        let _ = self.shared.peers_tx.send(ServerPeer {
            frames: Some(frames_tx),
            sent: sent_rx,
        });

        TransportConnection {
            sink: Box::new(ScriptedSink { sent: sent_tx }),
            frames: UnboundedReceiverStream::new(frames_rx).boxed(),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &Url) -> Result<TransportConnection, TransportError> {
        let outcome = {
            let mut script = self.shared.script.lock();
            script.opened.push(url.clone());
            script.queued.pop_front().unwrap_or(script.fallback)
        };

        match outcome {
            Outcome::Accept => Ok(self.accept()),
            Outcome::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.accept())
            }
            Outcome::Refuse => Err(TransportError::Open {
                endpoint: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

/// What the client wrote to a connection
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String),
    Close { code: u16, reason: String },
}

impl Sent {
    /// Parse a text frame as JSON
    pub fn json(&self) -> Value {
        match self {
            Sent::Text(text) => serde_json::from_str(text).expect("Client sent invalid JSON"),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }
}

struct ScriptedSink {
    sent: mpsc::UnboundedSender<Sent>,
}

#[async_trait]
impl FrameSink for ScriptedSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent
            .send(Sent::Text(text))
            .map_err(|_| TransportError::Write("peer gone".to_string()))
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), TransportError> {
        self.sent
            .send(Sent::Close { code, reason })
            .map_err(|_| TransportError::Write("peer gone".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Server side of one connection
// ---------------------------------------------------------------------------

type FrameTx = mpsc::UnboundedSender<Result<TransportFrame, TransportError>>;

pub struct ServerPeer {
    frames: Option<FrameTx>,
    sent: mpsc::UnboundedReceiver<Sent>,
}

impl ServerPeer {
    fn push(&self, item: Result<TransportFrame, TransportError>) {
        if let Some(frames) = &self.frames {
            let _ = frames.send(item);
        }
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(Ok(TransportFrame::Text(text.into())));
    }

    pub fn push_json(&self, value: Value) {
        self.push_text(value.to_string());
    }

    pub fn push_binary(&self, bytes: impl Into<Vec<u8>>) {
        self.push(Ok(TransportFrame::Binary(bytes.into())));
    }

    /// Send a close frame
    pub fn close(&self, code: u16, reason: &str) {
        self.push(Ok(TransportFrame::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    /// Fail the read side
    pub fn fail(&self, error: TransportError) {
        self.push(Err(error));
    }

    /// End the frame stream without a close frame
    pub fn hang_up(&mut self) {
        self.frames = None;
    }

    /// Next frame the client wrote
    pub async fn next_sent(&mut self) -> Option<Sent> {
        tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("Timeout waiting for the client to write")
    }

    pub fn try_next_sent(&mut self) -> Option<Sent> {
        self.sent.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Channel helpers
// ---------------------------------------------------------------------------

pub fn identity() -> SessionIdentity {
    SessionIdentity::new("42", "tok")
}

/// Channel over `transport` with the default config and a fixed identity
pub fn channel_with(transport: &ScriptedTransport, config: ChannelConfig) -> RealtimeChannel {
    ChannelBuilder::new()
        .with_config(config)
        .with_transport(transport.clone())
        .with_identity_provider(StaticIdentityProvider::new(identity()))
        .build()
        .expect("Failed to build channel")
}

pub fn channel(transport: &ScriptedTransport) -> RealtimeChannel {
    channel_with(transport, ChannelConfig::default())
}

/// Wait until the channel reaches `state`
pub async fn wait_for_state(channel: &RealtimeChannel, state: ConnectionState) {
    let mut status = channel.status_receiver();
    tokio::time::timeout(WAIT, status.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("Timeout waiting for {state}"))
        .expect("Status channel closed");
}

/// Let queued commands drain without advancing the clock by much
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Every transition buffered in `rx`
pub fn drain(
    rx: &mut tokio::sync::broadcast::Receiver<StateTransition>,
) -> Vec<StateTransition> {
    let mut out = Vec::new();
    while let Ok(transition) = rx.try_recv() {
        out.push(transition);
    }
    out
}

pub fn paid_frame() -> Value {
    serde_json::json!({
        "type": "commission_paid",
        "message": "£500 paid",
        "timestamp": "2024-01-01T00:00:00Z"
    })
}
