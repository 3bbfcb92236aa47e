use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, trace, warn};

use crate::outbound_queue::OutboundQueue;
use crate::protocol::InboundPayload;
use crate::reconnect_policy::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Error => "Connection Error",
        }
    }

    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Connected
    }

    fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait SocketConnector: Send + Sync + 'static {
    type Socket: FrameSocket;

    async fn open(&self, endpoint: &str) -> Result<Self::Socket, TransportError>;
}

#[async_trait]
pub trait FrameSocket: Send + 'static {
    async fn send_text(&mut self, frame: &str) -> Result<(), TransportError>;
    /// Next text frame; `None` once the peer closed the socket.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Inbound(InboundPayload),
}

/// Fire-and-forget control surface of a connection. Results surface later
/// as [`ConnectionEvent`]s.
pub trait ConnectionCommands {
    fn connect(&self);
    fn send(&self, frame: String);
    fn disconnect(&self);
}

#[derive(Debug)]
enum Command {
    Connect,
    Send(String),
    Disconnect,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    /// Closes the socket, cancels reconnection and stops the connection task.
    pub fn shutdown(&self) {
        self.dispatch(Command::Shutdown);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn dispatch(&self, command: Command) {
        if let Err(err) = self.commands.send(command) {
            debug!(command = ?err.0, "connection task has stopped; command dropped");
        }
    }
}

impl ConnectionCommands for ConnectionHandle {
    fn connect(&self) {
        self.dispatch(Command::Connect);
    }

    fn send(&self, frame: String) {
        self.dispatch(Command::Send(frame));
    }

    fn disconnect(&self) {
        self.dispatch(Command::Disconnect);
    }
}

pub struct SpawnedConnection {
    pub handle: ConnectionHandle,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pub task: JoinHandle<()>,
}

type OpeningSocket<S> = BoxFuture<'static, Result<S, TransportError>>;

/// Owns the single socket to one endpoint. All state lives on one task and
/// is only touched through the command channel.
pub struct ConnectionManager<C: SocketConnector> {
    connector: Arc<C>,
    endpoint: String,
    policy: ReconnectPolicy,
    state: ConnectionState,
    socket: Option<C::Socket>,
    opening: Option<OpeningSocket<C::Socket>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    reconnect_attempts: u32,
    reconnect_suppressed: bool,
    queue: OutboundQueue,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl<C: SocketConnector> ConnectionManager<C> {
    /// Starts the connection task in the `disconnected` state. Nothing is
    /// opened until the first `connect`.
    pub fn spawn(connector: C, endpoint: impl Into<String>, policy: ReconnectPolicy) -> SpawnedConnection {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let manager = Self {
            connector: Arc::new(connector),
            endpoint: endpoint.into(),
            policy,
            state: ConnectionState::Disconnected,
            socket: None,
            opening: None,
            reconnect_timer: None,
            reconnect_attempts: 0,
            reconnect_suppressed: false,
            queue: OutboundQueue::new(),
            events: event_tx,
        };

        SpawnedConnection {
            handle: ConnectionHandle {
                commands: command_tx,
            },
            events: event_rx,
            task: tokio::spawn(manager.run(command_rx)),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Send(frame)) => self.send(frame).await,
                    Some(Command::Disconnect) => self.disconnect().await,
                    Some(Command::Shutdown) | None => {
                        self.disconnect().await;
                        break;
                    }
                },
                inbound = next_inbound(self.socket.as_mut()) => match inbound {
                    Some(Ok(text)) => self.forward_inbound(&text),
                    Some(Err(err)) => self.handle_unexpected_close(Some(err)),
                    None => self.handle_unexpected_close(None),
                },
                opened = wait_opening(&mut self.opening) => {
                    self.opening = None;
                    match opened {
                        Ok(socket) => self.handle_opened(socket).await,
                        Err(err) => self.handle_open_failed(&err),
                    }
                },
                () = wait_timer(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.reconnect();
                },
            }
        }
        debug!(endpoint = %self.endpoint, "connection task stopped");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "connection state changed");
        self.state = state;
        self.emit(ConnectionEvent::StateChanged(state));
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            trace!("connection event receiver dropped");
        }
    }

    fn connect(&mut self) {
        if self.state.is_busy() {
            debug!(state = ?self.state, "connect ignored; connection already active");
            return;
        }
        self.reconnect_suppressed = false;
        self.reconnect_attempts = 0;
        self.reconnect_timer = None;
        self.begin_open();
    }

    fn reconnect(&mut self) {
        if self.reconnect_suppressed || self.state.is_busy() {
            return;
        }
        info!(
            attempt = self.reconnect_attempts,
            max_attempts = self.policy.max_attempts,
            "reconnecting"
        );
        self.begin_open();
    }

    fn begin_open(&mut self) {
        info!(endpoint = %self.endpoint, "opening connection");
        self.set_state(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();
        self.opening = Some(Box::pin(async move { connector.open(&endpoint).await }));
    }

    async fn handle_opened(&mut self, socket: C::Socket) {
        info!(endpoint = %self.endpoint, "connection established");
        self.socket = Some(socket);
        self.reconnect_attempts = 0;
        self.set_state(ConnectionState::Connected);
        self.flush_queue().await;
    }

    fn handle_open_failed(&mut self, err: &TransportError) {
        warn!(endpoint = %self.endpoint, error = %err, "failed to open connection");
        self.set_state(ConnectionState::Error);
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn handle_unexpected_close(&mut self, err: Option<TransportError>) {
        self.socket = None;
        match err {
            Some(err) => {
                warn!(error = %err, "connection failed");
                self.set_state(ConnectionState::Error);
            }
            None => info!("connection closed by peer"),
        }
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_suppressed {
            return;
        }
        match self.policy.next_delay(self.reconnect_attempts) {
            Some(delay) => {
                self.reconnect_attempts += 1;
                info!(
                    attempt = self.reconnect_attempts,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling reconnect"
                );
                self.reconnect_timer = Some(Box::pin(sleep(delay)));
            }
            None => warn!(
                max_attempts = self.policy.max_attempts,
                "reconnect attempts exhausted; staying disconnected"
            ),
        }
    }

    async fn send(&mut self, frame: String) {
        let Some(socket) = self.socket.as_mut() else {
            self.queue.enqueue(frame);
            debug!(queued = self.queue.len(), "connection not open; frame queued");
            return;
        };

        let sent = socket.send_text(&frame).await;
        if let Err(err) = sent {
            self.queue.requeue_front(frame);
            self.handle_unexpected_close(Some(err));
        }
    }

    async fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        debug!(queued = self.queue.len(), "replaying queued frames");

        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        let mut failure = None;
        while let Some(frame) = self.queue.pop_front() {
            let sent = socket.send_text(&frame).await;
            if let Err(err) = sent {
                self.queue.requeue_front(frame);
                failure = Some(err);
                break;
            }
        }

        if let Some(err) = failure {
            self.handle_unexpected_close(Some(err));
        }
    }

    async fn disconnect(&mut self) {
        self.reconnect_suppressed = true;
        self.reconnect_timer = None;
        self.opening = None;

        if let Some(mut socket) = self.socket.take() {
            if let Err(err) = socket.close().await {
                debug!(error = %err, "error while closing connection");
            }
            info!(endpoint = %self.endpoint, "connection closed");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn forward_inbound(&self, text: &str) {
        let payload = InboundPayload::from_text(text);
        if matches!(payload, InboundPayload::Raw(_)) {
            debug!("inbound frame is not JSON; forwarding raw payload");
        }
        self.emit(ConnectionEvent::Inbound(payload));
    }
}

async fn next_inbound<S: FrameSocket>(
    socket: Option<&mut S>,
) -> Option<Result<String, TransportError>> {
    match socket {
        Some(socket) => socket.next_frame().await,
        None => pending().await,
    }
}

async fn wait_opening<T>(opening: &mut Option<BoxFuture<'static, T>>) -> T {
    match opening {
        Some(opening) => opening.await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}
