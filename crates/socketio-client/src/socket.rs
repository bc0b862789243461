//! A [`Socket`] is the per-namespace face of the client: it owns the
//! handler registry and the emit API for one logical channel multiplexed
//! over the shared engine connection.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use socketio_client_core::{Packet, Value};
use tokio::sync::watch;

use crate::{
    ack::NO_ACK,
    client::ClientInner,
    errors::{AckError, ConnectError, SendError},
    event,
};

/// The connection state of one namespace socket. It is derived from, but
/// independent of, the shared engine state: the engine can be open while a
/// namespace has not yet completed its own connect handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::NotConnected => "notConnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Opaque handle to a registered event handler, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback = Arc<dyn Fn(&[Value], AckSender) + Send + Sync + 'static>;

struct Handler {
    id: HandlerId,
    once: bool,
    callback: Callback,
}

/// An emitter bound to the ack id of a received event, handed to event
/// handlers so they can reply.
///
/// Sending consumes the emitter; when the event did not request an ack,
/// sending is a no-op. The emitter holds a non-owning reference to the
/// client and is only useful while it is alive.
#[derive(Debug)]
pub struct AckSender {
    client: Weak<ClientInner>,
    ns: String,
    id: Option<i64>,
}

impl AckSender {
    pub(crate) fn new(client: Weak<ClientInner>, ns: String, id: Option<i64>) -> Self {
        Self { client, ns, id }
    }

    /// Whether the sender of the event asked for an acknowledgement
    pub fn expects_ack(&self) -> bool {
        self.id.is_some()
    }

    /// Send the acknowledgement back. A no-op when no ack was requested.
    pub fn send(self, data: Vec<Value>) -> Result<(), SendError> {
        let Some(id) = self.id else {
            return Ok(());
        };
        let client = self.client.upgrade().ok_or(SendError::NotConnected)?;
        client.send_packet(&Packet::ack(self.ns, data, id))
    }
}

/// A namespace socket.
///
/// Obtained from [`Client::socket`](crate::Client::socket); all sockets of
/// one client share a single engine connection.
pub struct Socket {
    ns: String,
    state: watch::Sender<ConnectionState>,
    /// Whether the socket should be (re)connected when the engine opens
    desired: AtomicBool,
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    client: Weak<ClientInner>,
}

impl Socket {
    pub(crate) fn new(ns: String, client: Weak<ClientInner>) -> Arc<Self> {
        Arc::new(Self {
            ns,
            state: watch::Sender::new(ConnectionState::NotConnected),
            desired: AtomicBool::new(false),
            handlers: RwLock::new(HashMap::new()),
            client,
        })
    }

    /// The namespace this socket is bound to
    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Register a handler for an event. Reserved client events
    /// (see [`event`]) go through the same registry as server events.
    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> HandlerId
    where
        F: Fn(&[Value], AckSender) + Send + Sync + 'static,
    {
        self.add_handler(event.into(), false, Arc::new(callback))
    }

    /// Register a handler that is removed after its first invocation
    pub fn once<F>(&self, event: impl Into<String>, callback: F) -> HandlerId
    where
        F: Fn(&[Value], AckSender) + Send + Sync + 'static,
    {
        self.add_handler(event.into(), true, Arc::new(callback))
    }

    fn add_handler(&self, event: String, once: bool, callback: Callback) -> HandlerId {
        let id = HandlerId::next();
        self.handlers
            .write()
            .unwrap()
            .entry(event)
            .or_default()
            .push(Handler { id, once, callback });
        id
    }

    /// Remove every handler registered for an event
    pub fn off(&self, event: &str) {
        self.handlers.write().unwrap().remove(event);
    }

    /// Remove one handler by the id returned from [`Socket::on`]
    pub fn off_id(&self, id: HandlerId) {
        let mut handlers = self.handlers.write().unwrap();
        for list in handlers.values_mut() {
            list.retain(|handler| handler.id != id);
        }
    }

    /// Emit an event with the given arguments.
    ///
    /// Fails when the socket is not connected. An encoding failure is also
    /// surfaced on the `error` event, carrying the event name, the
    /// arguments and the cause; the emit is dropped, not retried.
    pub fn emit(&self, event: impl Into<String>, data: Vec<Value>) -> Result<(), SendError> {
        self.emit_inner(event.into(), data, None)
    }

    /// Emit an event and invoke `callback` with the server reply, or with
    /// the `["NO ACK"]` sentinel once `timeout` elapses without one.
    /// `None` never times out.
    pub fn emit_with_ack_callback<F>(
        &self,
        event: impl Into<String>,
        data: Vec<Value>,
        timeout: Option<Duration>,
        callback: F,
    ) -> Result<(), SendError>
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        let client = self.client.upgrade().ok_or(SendError::NotConnected)?;
        let id = client.acks().next_id();
        client.acks().register(id, callback, timeout);
        match self.emit_inner(event.into(), data, Some(id)) {
            Ok(()) => Ok(()),
            Err(err) => {
                client.acks().discard(id);
                Err(err)
            }
        }
    }

    /// Emit an event and await the server reply
    pub async fn emit_with_ack(
        &self,
        event: impl Into<String>,
        data: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, AckError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.emit_with_ack_callback(event, data, timeout, move |data| {
            tx.send(data).ok();
        })?;
        match rx.await {
            Ok(data) if data.len() == 1 && data[0].as_str() == Some(NO_ACK) => {
                Err(AckError::Timeout)
            }
            Ok(data) => Ok(data),
            Err(_) => Err(AckError::Closed),
        }
    }

    fn emit_inner(
        &self,
        event: String,
        data: Vec<Value>,
        ack_id: Option<i64>,
    ) -> Result<(), SendError> {
        if self.state() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        let client = self.client.upgrade().ok_or(SendError::NotConnected)?;

        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push(Value::from(event.as_str()));
        payload.extend(data);
        let mut packet = Packet::event(self.ns.clone(), payload);
        if let Some(id) = ack_id {
            packet.set_ack_id(id);
        }
        if let Err(err) = client.send_packet(&packet) {
            tracing::warn!(ns = %self.ns, event = %event, %err, "emit dropped");
            self.fire(
                event::ERROR,
                &[
                    Value::from(event.as_str()),
                    Value::Array(packet.data[1..].to_vec()),
                    Value::from(err.to_string()),
                ],
                None,
            );
            return Err(err);
        }
        Ok(())
    }

    /// Connect this namespace over the shared engine, opening the engine
    /// first if this is the first socket to connect. Already connected is a
    /// no-op.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let client = self.client.upgrade().ok_or(ConnectError::Disconnected)?;
        client.connect_socket(self, None).await
    }

    /// Like [`Socket::connect`] with a deadline: when the socket is still
    /// not connected after `timeout` the client is disconnected and
    /// [`ConnectError::Timeout`] is returned.
    pub async fn connect_timeout(&self, timeout: Duration) -> Result<(), ConnectError> {
        let client = self.client.upgrade().ok_or(ConnectError::Disconnected)?;
        client.connect_socket(self, Some(timeout)).await
    }

    /// Leave this namespace: a disconnect packet is sent for it, the shared
    /// engine stays up for the other sockets
    pub fn disconnect(&self) -> Result<(), SendError> {
        self.desired.store(false, Ordering::Relaxed);
        let client = self.client.upgrade().ok_or(SendError::NotConnected)?;
        let res = client.send_packet(&Packet::disconnect(self.ns.clone()));
        self.set_state(ConnectionState::Disconnected);
        self.fire(
            event::DISCONNECT,
            &[Value::from("client namespace disconnect")],
            None,
        );
        res
    }

    // ==== internal surface used by the client ====

    pub(crate) fn desired(&self) -> bool {
        self.desired.load(Ordering::Relaxed)
    }

    pub(crate) fn set_desired(&self, desired: bool) {
        self.desired.store(desired, Ordering::Relaxed);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Transition the socket state, firing the `statusChange` reserved
    /// event on an actual change
    pub(crate) fn set_state(&self, state: ConnectionState) {
        if *self.state.borrow() == state {
            return;
        }
        tracing::debug!(ns = %self.ns, state = state.as_str(), "socket state changed");
        self.state.send_replace(state);
        self.fire(event::STATUS_CHANGE, &[Value::from(state.as_str())], None);
    }

    /// Dispatch an inbound event packet: `data[0]` is the event name, the
    /// rest are the handler arguments. The packet ack id, if any, is bound
    /// into the [`AckSender`] handed to the handlers.
    pub(crate) fn dispatch(&self, packet: &Packet) {
        match packet.event_name() {
            Some(name) => self.fire(name, &packet.data[1..], packet.id),
            None => {
                tracing::debug!(ns = %self.ns, "event packet without an event name, dropping");
            }
        }
    }

    /// Invoke the handlers registered for `event`. `once` handlers are
    /// deregistered before their single invocation.
    pub(crate) fn fire(&self, event: &str, args: &[Value], ack_id: Option<i64>) {
        let callbacks: Vec<Callback> = {
            let mut handlers = self.handlers.write().unwrap();
            let Some(list) = handlers.get_mut(event) else {
                return;
            };
            let callbacks = list.iter().map(|h| h.callback.clone()).collect();
            list.retain(|handler| !handler.once);
            callbacks
        };
        for callback in callbacks {
            let ack = AckSender::new(self.client.clone(), self.ns.clone(), ack_id);
            callback(args, ack);
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("ns", &self.ns)
            .field("state", &self.state())
            .finish()
    }
}
