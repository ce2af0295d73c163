//! Connection manager for the real-time channel
//!
//! The `ConnectionManager` owns the single live connection for a session. All
//! connection state lives inside one actor task; the public handle, the
//! frame reader, and the timers only post [`Command`]s to it, so every state
//! transition happens at one serialized point.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager (handle) ──connect/send/disconnect──┐
//! opener task  ──Opened/OpenFailed──────────────────────┤
//! reader task  ──Frame/ReadFailed/StreamEnded───────────┼──▶ ConnectionActor::run()
//! heartbeat    ──HeartbeatTick──────────────────────────┤          │
//! retry timer  ──RetryDue───────────────────────────────┤     decode frame
//! pong timer   ──PongTimeout────────────────────────────┘          │
//!                                                           EventBus::publish()
//! ```
//!
//! Commands produced by background tasks carry the connection generation they
//! were spawned for. Every teardown bumps the generation, so anything still in
//! flight from an older connection is ignored when it arrives.

use super::protocol::{self, ClientMessage};
use super::state::{ConnectionState, ConnectionStatus, StateTransition};
use super::transport::{
    FrameSink, FrameStream, NORMAL_CLOSURE, Transport, TransportConnection, TransportFrame,
    redacted,
};
use crate::config::{ChannelConfig, HeartbeatConfig, ReconnectPolicy};
use crate::core::error::{ChannelError, ConfigError, DecodeError, TransportError};
use crate::core::events::{Event, EventBus};
use crate::core::identity::SessionIdentity;
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use url::Url;

/// Close reason sent when the application disconnects
pub const DEFAULT_DISCONNECT_REASON: &str = "User disconnected";

/// Upper bound on waiting for the close frame to be written
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffered state transitions per receiver
const TRANSITION_BUFFER: usize = 64;

enum Command {
    Connect(SessionIdentity),
    Disconnect {
        reason: String,
    },
    Send(serde_json::Value),
    PendingTimers(oneshot::Sender<usize>),
    Shutdown(Option<oneshot::Sender<()>>),

    Opened {
        generation: u64,
        connection: TransportConnection,
    },
    OpenFailed {
        generation: u64,
        error: TransportError,
    },
    Frame {
        generation: u64,
        frame: TransportFrame,
    },
    ReadFailed {
        generation: u64,
        error: TransportError,
    },
    StreamEnded {
        generation: u64,
    },
    HeartbeatTick {
        generation: u64,
    },
    PongTimeout {
        generation: u64,
    },
    RetryDue {
        generation: u64,
    },
}

/// Handle to the connection actor
///
/// Methods return immediately; outcomes are observed through
/// [`state`](Self::state), [`transitions`](Self::transitions) and the events
/// published on the bus. Dropping the handle stops the actor and closes the
/// connection.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    transitions: broadcast::Sender<StateTransition>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Validate `config` and start the actor on the current tokio runtime
    pub fn spawn(
        config: &ChannelConfig,
        transport: Arc<dyn Transport>,
        bus: EventBus,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let endpoint = config.endpoint_url()?;

        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);

        let actor = ConnectionActor {
            endpoint,
            reconnect: config.reconnect.clone(),
            heartbeat: config.heartbeat.clone(),
            transport,
            bus,
            commands: commands.clone(),
            status: status_tx,
            transitions: transitions.clone(),
            state: ConnectionState::Idle,
            attempt: 0,
            generation: 0,
            identity: None,
            sink: None,
            opener: None,
            reader: None,
            timers: Timers::default(),
        };

        let handle = tokio::spawn(actor.run(rx));

        Ok(Self {
            commands,
            status,
            transitions,
            actor: Mutex::new(Some(handle)),
        })
    }

    /// Open a connection for `identity`
    ///
    /// No-op while already connecting or open. Without an identity nothing
    /// happens beyond a diagnostic.
    pub fn connect(&self, identity: Option<SessionIdentity>) {
        match identity {
            Some(identity) => self.enqueue(Command::Connect(identity)),
            None => tracing::warn!("No session identity available, not connecting"),
        }
    }

    /// Close the connection with a normal-closure code and cancel all timers
    ///
    /// Idempotent; always ends in `Closed`.
    pub fn disconnect(&self, reason: impl Into<String>) {
        self.enqueue(Command::Disconnect {
            reason: reason.into(),
        });
    }

    /// Send a JSON message if the connection is open; dropped otherwise
    pub fn send(&self, message: serde_json::Value) {
        self.enqueue(Command::Send(message));
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Reconnect attempts made since the last successful open
    pub fn attempt_count(&self) -> u32 {
        self.status.borrow().attempt
    }

    /// Receive every state transition from now on
    pub fn transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Latest-value receiver for the connection status
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Stream of status changes, starting with the current one
    pub fn watch_status(&self) -> WatchStream<ConnectionStatus> {
        WatchStream::new(self.status.clone())
    }

    /// Number of heartbeat, retry and pong timers currently scheduled
    pub async fn pending_timers(&self) -> Result<usize, ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::PendingTimers(tx))
            .map_err(|_| ChannelError::ChannelClosed)?;
        rx.await.map_err(|_| ChannelError::ChannelClosed)
    }

    /// Disconnect, stop the actor and wait for it to finish
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(Some(tx))).is_ok() {
            let _ = rx.await;
        }

        let handle = self.actor.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::debug!(error = %e, "Connection actor did not exit cleanly");
        }
    }

    /// Whether the actor is still running
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
            && self
                .actor
                .lock()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    fn enqueue(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Connection actor stopped, dropping command");
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown(None));
    }
}

/// Retained handles for every scheduled timer
#[derive(Default)]
struct Timers {
    heartbeat: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    pong: Option<JoinHandle<()>>,
}

impl Timers {
    fn cancel_all(&mut self) {
        for handle in [self.heartbeat.take(), self.retry.take(), self.pong.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }

    fn disarm_pong(&mut self) {
        if let Some(handle) = self.pong.take() {
            handle.abort();
        }
    }

    fn pending(&self) -> usize {
        [&self.heartbeat, &self.retry, &self.pong]
            .into_iter()
            .filter(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .count()
    }
}

struct ConnectionActor {
    endpoint: Url,
    reconnect: ReconnectPolicy,
    heartbeat: HeartbeatConfig,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Sender<ConnectionStatus>,
    transitions: broadcast::Sender<StateTransition>,

    state: ConnectionState,
    attempt: u32,
    generation: u64,
    identity: Option<SessionIdentity>,
    sink: Option<Box<dyn FrameSink>>,
    opener: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    timers: Timers,
}

impl ConnectionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("Connection actor started");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Shutdown(reply) => {
                    self.disconnect("Client shutdown".to_string()).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    break;
                }
                command => self.handle(command).await,
            }
        }

        let _ = self.teardown();
        tracing::debug!("Connection actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect(identity) => self.connect(identity),
            Command::Disconnect { reason } => self.disconnect(reason).await,
            Command::Send(message) => self.send(message).await,
            Command::PendingTimers(reply) => {
                let _ = reply.send(self.timers.pending());
            }
            // Handled by the run loop
            Command::Shutdown(_) => {}

            Command::Opened {
                generation,
                connection,
            } => self.on_opened(generation, connection),
            Command::OpenFailed { generation, error } => {
                if self.is_current(generation, ConnectionState::Connecting) {
                    self.opener = None;
                    self.handle_failure(error);
                }
            }
            Command::Frame { generation, frame } => {
                if self.is_current(generation, ConnectionState::Open) {
                    self.on_frame(frame);
                }
            }
            Command::ReadFailed { generation, error } => {
                if self.is_current(generation, ConnectionState::Open) {
                    self.teardown();
                    self.handle_failure(error);
                }
            }
            Command::StreamEnded { generation } => {
                if self.is_current(generation, ConnectionState::Open) {
                    self.teardown();
                    self.handle_failure(TransportError::StreamEnded);
                }
            }
            Command::HeartbeatTick { generation } => {
                if self.is_current(generation, ConnectionState::Open) {
                    self.on_heartbeat().await;
                }
            }
            Command::PongTimeout { generation } => {
                if self.is_current(generation, ConnectionState::Open) {
                    let timeout = self.heartbeat.pong_timeout().unwrap_or_default();
                    self.teardown();
                    self.handle_failure(TransportError::PongTimeout(timeout));
                }
            }
            Command::RetryDue { generation } => {
                if self.is_current(generation, ConnectionState::Connecting) {
                    self.timers.retry = None;
                    self.start_open();
                }
            }
        }
    }

    fn is_current(&self, generation: u64, state: ConnectionState) -> bool {
        generation == self.generation && self.state == state
    }

    fn connect(&mut self, identity: SessionIdentity) {
        if !self.state.accepts_connect() {
            tracing::debug!(state = %self.state, "Connect ignored, connection already active");
            return;
        }

        tracing::info!(subject_id = %identity.subject_id(), "Connecting real-time channel");
        self.identity = Some(identity);
        self.transition(ConnectionState::Connecting);
        self.start_open();
    }

    fn start_open(&mut self) {
        let Some(identity) = self.identity.as_ref() else {
            tracing::warn!("No session identity available, not connecting");
            return;
        };

        self.generation += 1;
        let generation = self.generation;

        let url = match identity.connection_url(&self.endpoint) {
            Ok(url) => url,
            Err(e) => {
                self.handle_failure(e);
                return;
            }
        };

        tracing::debug!(
            endpoint = %redacted(&url),
            attempt = self.attempt,
            "Opening connection"
        );

        let transport = self.transport.clone();
        let commands = self.commands.clone();
        self.opener = Some(tokio::spawn(async move {
            let command = match transport.open(&url).await {
                Ok(connection) => Command::Opened {
                    generation,
                    connection,
                },
                Err(error) => Command::OpenFailed { generation, error },
            };
            let _ = commands.send(command);
        }));
    }

    fn on_opened(&mut self, generation: u64, connection: TransportConnection) {
        if !self.is_current(generation, ConnectionState::Connecting) {
            // Superseded by a disconnect or a newer attempt
            tracing::debug!(generation, "Discarding stale connection");
            let mut sink = connection.sink;
            tokio::spawn(async move {
                let _ = sink
                    .close(NORMAL_CLOSURE, "Superseded".to_string())
                    .await;
            });
            return;
        }

        let TransportConnection { sink, frames } = connection;
        self.opener = None;
        self.sink = Some(sink);
        self.attempt = 0;
        self.transition(ConnectionState::Open);

        self.reader = Some(spawn_reader(generation, frames, self.commands.clone()));
        self.timers.heartbeat = Some(spawn_heartbeat(
            generation,
            self.heartbeat.interval(),
            self.commands.clone(),
        ));
    }

    fn on_frame(&mut self, frame: TransportFrame) {
        // Any inbound traffic proves liveness
        self.timers.disarm_pong();

        match frame {
            TransportFrame::Text(text) => self.dispatch(protocol::decode(&text)),
            TransportFrame::Binary(bytes) => self.dispatch(protocol::decode_bytes(&bytes)),
            TransportFrame::Close { code, reason } => {
                self.teardown();
                if code == NORMAL_CLOSURE {
                    tracing::info!(reason = %reason, "Server closed connection normally");
                    self.transition(ConnectionState::Closed);
                } else {
                    self.handle_failure(TransportError::AbnormalClose { code, reason });
                }
            }
        }
    }

    fn dispatch(&self, decoded: Result<Event, DecodeError>) {
        match decoded {
            Ok(event) => {
                let delivered = self.bus.publish(&event);
                tracing::debug!(
                    event_type = %event.kind(),
                    delivered,
                    "Dispatched event"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed frame");
            }
        }
    }

    async fn on_heartbeat(&mut self) {
        let ping = match serde_json::to_string(&ClientMessage::ping()) {
            Ok(ping) => ping,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize ping");
                return;
            }
        };

        if let Err(e) = self.write(ping).await {
            self.teardown();
            self.handle_failure(e);
            return;
        }
        tracing::debug!("Heartbeat ping sent");

        if let Some(timeout) = self.heartbeat.pong_timeout()
            && self.timers.pong.is_none()
        {
            let generation = self.generation;
            let commands = self.commands.clone();
            self.timers.pong = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = commands.send(Command::PongTimeout { generation });
            }));
        }
    }

    async fn send(&mut self, message: serde_json::Value) {
        if self.state != ConnectionState::Open {
            tracing::warn!(state = %self.state, "Cannot send message - not connected");
            return;
        }

        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unserializable message");
                return;
            }
        };

        if let Err(e) = self.write(text).await {
            self.teardown();
            self.handle_failure(e);
        }
    }

    async fn write(&mut self, text: String) -> Result<(), TransportError> {
        match self.sink.as_mut() {
            Some(sink) => sink.send_text(text).await,
            None => Err(TransportError::Write("no open connection".to_string())),
        }
    }

    /// Decide between another attempt and giving up
    fn handle_failure(&mut self, error: TransportError) {
        if self.attempt < self.reconnect.max_attempts {
            self.attempt += 1;
            tracing::warn!(
                error = %error,
                attempt = self.attempt,
                max_attempts = self.reconnect.max_attempts,
                "Connection lost, scheduling reconnect"
            );
            self.transition(ConnectionState::Connecting);

            let generation = self.generation;
            let interval = self.reconnect.interval();
            let commands = self.commands.clone();
            self.timers.retry = Some(tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                let _ = commands.send(Command::RetryDue { generation });
            }));
        } else {
            tracing::warn!(
                error = %error,
                attempts = self.attempt,
                "Reconnection attempts exhausted, giving up"
            );
            self.transition(ConnectionState::Faulted);
            self.bus.publish(&Event::connection_failed(self.attempt));
        }
    }

    async fn disconnect(&mut self, reason: String) {
        if let Some(mut sink) = self.teardown() {
            self.transition(ConnectionState::Closing);
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close(NORMAL_CLOSURE, reason)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Close frame not delivered"),
                Err(_) => tracing::debug!("Timed out sending close frame"),
            }
        }

        if self.state != ConnectionState::Closed {
            self.transition(ConnectionState::Closed);
        }
    }

    /// Cancel every task tied to the current connection and release the sink
    fn teardown(&mut self) -> Option<Box<dyn FrameSink>> {
        self.generation += 1;
        self.timers.cancel_all();
        if let Some(opener) = self.opener.take() {
            opener.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.sink.take()
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        self.state = to;

        let status = ConnectionStatus {
            state: to,
            attempt: self.attempt,
        };
        self.status.send_replace(status);
        let _ = self.transitions.send(StateTransition {
            from,
            to,
            attempt: self.attempt,
        });

        tracing::info!(from = %from, to = %to, attempt = self.attempt, "Connection state changed");
    }
}

fn spawn_reader(
    generation: u64,
    mut frames: FrameStream,
    commands: mpsc::UnboundedSender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = frames.next().await {
            let command = match item {
                Ok(frame) => Command::Frame { generation, frame },
                Err(error) => {
                    let _ = commands.send(Command::ReadFailed { generation, error });
                    return;
                }
            };
            if commands.send(command).is_err() {
                return;
            }
        }
        let _ = commands.send(Command::StreamEnded { generation });
    })
}

fn spawn_heartbeat(
    generation: u64,
    period: Duration,
    commands: mpsc::UnboundedSender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if commands.send(Command::HeartbeatTick { generation }).is_err() {
                break;
            }
        }
    })
}
