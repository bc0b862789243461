//! The client manager: owns the engine connection, the namespace socket
//! registry and the ack registry, routes every decoded packet to the
//! socket matching its namespace and runs the reconnection state machine.
//!
//! Inbound engine events are consumed by one task in arrival order; user
//! handlers and ack resolutions are invoked from that same task, so
//! delivery order matches the order the server sent the packets and user
//! code never sees concurrent reentry.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use engineio_client::{
    CloseReason, Engine, EngineConfig, EngineError, EngineEvent, EngineState,
};
use socketio_client_core::{Packet, PacketType, ParseError, ParserState, Value, parser};
use tokio::sync::{Notify, mpsc};

use crate::{
    ack::AckRegistry,
    errors::{ConnectError, SendError},
    event,
    io::ClientConfig,
    socket::{ConnectionState, Socket},
};

/// A socket.io client.
///
/// One client owns one engine connection and multiplexes any number of
/// namespace [`Socket`]s over it. Cloning the client clones the handle,
/// not the connection.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub(crate) fn new(config: ClientConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| ClientInner {
            connector: config.connector.clone(),
            config,
            sockets: RwLock::new(HashMap::new()),
            acks: AckRegistry::new(),
            engine: Mutex::new(None),
            parser_state: ParserState::default(),
            deliberate: AtomicBool::new(false),
            shutdown: Notify::new(),
            connect_lock: tokio::sync::Mutex::new(()),
            weak: weak.clone(),
        });
        Client { inner }
    }

    /// The socket bound to a namespace, created on first use. A missing
    /// leading slash is added.
    pub fn socket(&self, ns: &str) -> Arc<Socket> {
        self.inner.socket(ns)
    }

    /// Connect the configured default namespace, opening the shared engine
    /// if needed. Resolves once the namespace is connected or the
    /// configured connect timeout elapsed.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.inner.deliberate.store(false, Ordering::SeqCst);
        let ns = self.inner.config.namespace.clone();
        let socket = self.inner.socket(&ns);
        self.inner.connect_socket(&socket, None).await
    }

    /// Deliberately close the connection: pending acks and timers are
    /// invalidated, a reconnection in progress stops, every socket goes to
    /// [`ConnectionState::Disconnected`].
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// The state of the underlying engine session
    pub fn engine_state(&self) -> EngineState {
        self.inner.engine_state()
    }
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    connector: Arc<dyn engineio_client::Connector>,
    /// The namespace socket registry. Owned by the client, with an
    /// explicit lifecycle: sockets exist from first lookup until the
    /// client is dropped.
    sockets: RwLock<HashMap<String, Arc<Socket>>>,
    acks: Arc<AckRegistry>,
    engine: Mutex<Option<Engine>>,
    parser_state: ParserState,
    /// Set on a deliberate disconnect; an engine close with this flag up
    /// does not trigger the reconnection policy
    deliberate: AtomicBool,
    shutdown: Notify,
    /// Serializes engine opening so concurrent connects share one engine
    connect_lock: tokio::sync::Mutex<()>,
    weak: Weak<ClientInner>,
}

impl ClientInner {
    pub(crate) fn socket(&self, ns: &str) -> Arc<Socket> {
        let ns = if ns.starts_with('/') {
            ns.to_owned()
        } else {
            format!("/{ns}")
        };
        if let Some(socket) = self.sockets.read().unwrap().get(&ns) {
            return socket.clone();
        }
        self.sockets
            .write()
            .unwrap()
            .entry(ns.clone())
            .or_insert_with(|| Socket::new(ns, self.weak.clone()))
            .clone()
    }

    pub(crate) fn acks(&self) -> &Arc<AckRegistry> {
        &self.acks
    }

    pub(crate) fn engine_state(&self) -> EngineState {
        self.engine
            .lock()
            .unwrap()
            .as_ref()
            .map(Engine::state)
            .unwrap_or(EngineState::Closed)
    }

    /// Drive one socket to [`ConnectionState::Connected`], opening the
    /// shared engine if this is the first socket to connect (or a new one
    /// is forced). `timeout` falls back to the configured connect timeout;
    /// zero means no deadline.
    pub(crate) async fn connect_socket(
        &self,
        socket: &Socket,
        timeout: Option<Duration>,
    ) -> Result<(), ConnectError> {
        let timeout = timeout.unwrap_or(self.config.connect_timeout);
        if socket.state() == ConnectionState::Connected {
            return Ok(());
        }
        socket.set_desired(true);
        socket.set_state(ConnectionState::Connecting);
        let mut state_rx = socket.subscribe();

        {
            let _guard = self.connect_lock.lock().await;
            let open = self.engine_state() == EngineState::Open;
            if open && self.config.force_new {
                tracing::debug!("force new engine: closing the current one");
                if let Some(engine) = self.engine.lock().unwrap().take() {
                    engine.close();
                }
            }
            if self.engine_state() == EngineState::Open {
                // Engine already up: just ask for the namespace
                self.request_ns_connect(socket).ok();
            } else {
                self.open_engine().await?;
            }
        }

        let wait = state_rx.wait_for(|state| *state == ConnectionState::Connected);
        if timeout.is_zero() {
            return wait.await.map(|_| ()).map_err(|_| ConnectError::Disconnected);
        }
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ConnectError::Disconnected),
            Err(_) => {
                tracing::debug!(ns = %socket.ns(), "connection attempt timed out");
                self.disconnect();
                Err(ConnectError::Timeout)
            }
        }
    }

    /// Open the engine and spawn the routing loop for its events
    fn open_engine(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), EngineError>> + Send + '_>>
    {
        Box::pin(async move {
            let mut engine_config = EngineConfig::new(self.config.url.clone());
            engine_config.path = self.config.path.clone();
            engine_config.force_polling = self.config.force_polling;
            engine_config.force_websockets = self.config.force_websockets;
            engine_config.extra_headers = self.config.extra_headers.clone();
            engine_config.connect_params = self.config.connect_params.clone();

            let (engine, events) =
                Engine::connect(engine_config, self.connector.clone()).await?;
            *self.engine.lock().unwrap() = Some(engine);
            self.on_engine_open();
            tokio::spawn(run_loop(self.weak.clone(), events));
            Ok(())
        })
    }

    /// The engine is open: connect every socket that wants to be. The root
    /// namespace needs no explicit connect handshake, the others send a
    /// connect packet and wait for the server echo.
    fn on_engine_open(&self) {
        for socket in self.all_sockets() {
            if socket.desired() && socket.state() != ConnectionState::Connected {
                socket.set_state(ConnectionState::Connecting);
                self.request_ns_connect(&socket).ok();
            }
        }
    }

    fn request_ns_connect(&self, socket: &Socket) -> Result<(), SendError> {
        if socket.ns() == "/" {
            socket.set_state(ConnectionState::Connected);
            socket.fire(event::CONNECT, &[Value::from("/")], None);
            Ok(())
        } else {
            self.send_packet(&Packet::connect(socket.ns()))
        }
    }

    /// Encode and send one packet over the engine. All callers serialize
    /// through the engine lock and the engine's own command queue, so
    /// writes keep caller order and a message stays adjacent to its binary
    /// attachments.
    pub(crate) fn send_packet(&self, packet: &Packet) -> Result<(), SendError> {
        let (msg, bins) = parser::encode(packet)?;
        let guard = self.engine.lock().unwrap();
        let engine = guard.as_ref().ok_or(SendError::NotConnected)?;
        if bins.is_empty() {
            engine.send(msg)?;
        } else {
            engine.send_with_bins(msg, bins)?;
        }
        Ok(())
    }

    pub(crate) fn disconnect(&self) {
        tracing::debug!("deliberate disconnect");
        self.deliberate.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.acks.clear();
        let engine = self.engine.lock().unwrap().take();
        match engine {
            // The routing loop finalizes the sockets once the engine
            // acknowledges the close
            Some(engine) => engine.close(),
            None => self.finalize_disconnect("client disconnect"),
        }
    }

    fn finalize_disconnect(&self, reason: &str) {
        for socket in self.all_sockets() {
            if socket.state() == ConnectionState::Connected
                || socket.state() == ConnectionState::Connecting
                || socket.state() == ConnectionState::NotConnected && socket.desired()
            {
                socket.set_state(ConnectionState::Disconnected);
                socket.fire(event::DISCONNECT, &[Value::from(reason)], None);
            }
            socket.set_desired(false);
        }
    }

    fn all_sockets(&self) -> Vec<Arc<Socket>> {
        self.sockets.read().unwrap().values().cloned().collect()
    }

    fn broadcast(&self, event: &str, args: &[Value]) {
        for socket in self.all_sockets() {
            socket.fire(event, args, None);
        }
    }

    fn on_message(&self, msg: &str) {
        match parser::decode_str(&self.parser_state, msg) {
            Ok(packet) => self.route(packet),
            // The pending binary packet dispatches once its blobs arrived
            Err(ParseError::NeedsMoreBinaryData) => {}
            Err(err) => {
                tracing::warn!(%err, "dropping malformed packet");
                self.broadcast(event::ERROR, &[Value::from(err.to_string())]);
            }
        }
    }

    fn on_binary(&self, bin: Bytes) {
        match parser::decode_bin(&self.parser_state, bin) {
            Ok(packet) => self.route(packet),
            Err(ParseError::NeedsMoreBinaryData) => {}
            Err(err) => {
                tracing::warn!(%err, "dropping unexpected binary payload");
                self.broadcast(event::ERROR, &[Value::from(err.to_string())]);
            }
        }
    }

    /// Route one decoded packet to the socket matching its namespace
    fn route(&self, packet: Packet) {
        let socket = self.sockets.read().unwrap().get(&packet.ns).cloned();
        let Some(socket) = socket else {
            tracing::debug!(ns = %packet.ns, "dropping packet for unknown namespace");
            return;
        };
        match packet.kind {
            PacketType::Connect => {
                if socket.state() != ConnectionState::Connected {
                    socket.set_state(ConnectionState::Connected);
                    socket.fire(event::CONNECT, &[Value::from(packet.ns.as_str())], None);
                }
            }
            PacketType::Disconnect => {
                socket.set_desired(false);
                socket.set_state(ConnectionState::Disconnected);
                socket.fire(
                    event::DISCONNECT,
                    &[Value::from("server namespace disconnect")],
                    None,
                );
            }
            PacketType::Event | PacketType::BinaryEvent => socket.dispatch(&packet),
            PacketType::Ack | PacketType::BinaryAck => {
                if let Some(id) = packet.id {
                    self.acks.resolve(id, packet.data);
                }
            }
            // Errors must be observable during connection attempts, so they
            // bypass the connected check entirely
            PacketType::Error => socket.fire(event::ERROR, &packet.data, None),
        }
    }

    async fn on_engine_close(self: Arc<Self>, reason: CloseReason) {
        {
            let mut guard = self.engine.lock().unwrap();
            // A replacement engine may already be up (force new): then this
            // close belongs to the previous session and there is nothing to
            // finalize
            if guard.as_ref().is_some_and(|e| e.state() == EngineState::Open) {
                return;
            }
            guard.take();
        }
        let deliberate =
            self.deliberate.load(Ordering::SeqCst) || reason == CloseReason::Deliberate;
        if deliberate || !self.config.reconnects {
            self.finalize_disconnect(close_reason_str(reason));
            return;
        }
        tracing::debug!(?reason, "engine closed unexpectedly");
        self.reconnect_loop().await;
    }

    /// The reconnection state machine: wait, attempt, count, bounded by
    /// `reconnect_attempts`. Stops immediately on a deliberate disconnect
    /// mid-backoff.
    async fn reconnect_loop(self: Arc<Self>) {
        for socket in self.all_sockets() {
            if socket.desired() {
                socket.set_state(ConnectionState::NotConnected);
            }
        }
        self.broadcast(event::RECONNECT, &[]);
        let mut attempts: u32 = 0;
        loop {
            if self.deliberate.load(Ordering::SeqCst) {
                return;
            }
            if let Some(max) = self.config.reconnect_attempts {
                if attempts >= max {
                    tracing::debug!(attempts, "reconnect attempts exhausted");
                    self.finalize_disconnect("Reconnect Failed");
                    return;
                }
            }
            attempts += 1;
            self.broadcast(event::RECONNECT_ATTEMPT, &[Value::Int(i64::from(attempts))]);
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_wait) => {}
                _ = self.shutdown.notified() => return,
            }
            if self.deliberate.load(Ordering::SeqCst) {
                return;
            }
            match self.open_engine().await {
                // A fresh routing loop owns the connection now; the attempt
                // counter starts over on the next unexpected close
                Ok(()) => return,
                Err(err) => {
                    tracing::debug!(%err, attempt = attempts, "reconnect attempt failed");
                    self.broadcast(event::ERROR, &[Value::from(err.to_string())]);
                }
            }
        }
    }
}

impl std::fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("sockets", &self.sockets.read().unwrap().len())
            .field("engine", &self.engine_state())
            .finish()
    }
}

fn close_reason_str(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::Deliberate => "client disconnect",
        CloseReason::TransportClose => "server disconnect",
        CloseReason::TransportError => "transport error",
        CloseReason::HeartbeatTimeout => "ping timeout",
    }
}

/// The routing loop: consumes engine events in arrival order and feeds
/// them through decode and dispatch on this single task
async fn run_loop(client: Weak<ClientInner>, mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(engine_event) = events.recv().await {
        let Some(client) = client.upgrade() else {
            return;
        };
        match engine_event {
            EngineEvent::Message(msg) => client.on_message(&msg),
            EngineEvent::Binary(bin) => client.on_binary(bin),
            EngineEvent::Ping => client.broadcast(event::PING, &[]),
            EngineEvent::Pong => client.broadcast(event::PONG, &[]),
            EngineEvent::Error(err) => {
                client.broadcast(event::ERROR, &[Value::from(err.to_string())]);
            }
            EngineEvent::Closed(reason) => {
                client.on_engine_close(reason).await;
                return;
            }
        }
    }
}


