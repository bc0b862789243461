//! The engine session state machine.
//!
//! One tokio task owns every piece of transport state: the polling request
//! in flight, the websocket halves, the upgrade probe and the heartbeat.
//! Commands arrive on an ordered mpsc queue and decoded packets leave on
//! another, so outbound writes keep caller order and inbound messages keep
//! arrival order. The transport mode flags are only ever touched by this
//! task, which is also the one framing writes: a packet is always encoded
//! for the transport that carries it.

use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::{
    config::EngineConfig,
    errors::{CloseReason, EngineError, HandshakeFailure, TransportError},
    packet::{OpenPacket, Packet, PacketParseError, ServerError},
    payload,
    transport::{BoxFuture, BoxWsSink, BoxWsStream, Connector, PollRequest, PollResponse, WsFrame},
};

/// The engine session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Closed = 0,
    Opening = 1,
    Open = 2,
}

impl From<u8> for EngineState {
    fn from(state: u8) -> Self {
        match state {
            1 => EngineState::Opening,
            2 => EngineState::Open,
            _ => EngineState::Closed,
        }
    }
}

/// Events delivered by the engine task, in arrival order
#[derive(Debug)]
pub enum EngineEvent {
    /// A decoded message payload (one socket.io packet string)
    Message(String),
    /// A decoded binary payload
    Binary(Bytes),
    /// A heartbeat ping was sent
    Ping,
    /// A heartbeat pong was received
    Pong,
    /// A recovered, non-fatal error
    Error(EngineError),
    /// The session ended. This is always the last event.
    Closed(CloseReason),
}

enum Command {
    Packets(Vec<Packet>),
    Close,
}

/// Handle to a running engine session.
///
/// Dropping the handle closes the session.
#[derive(Debug)]
pub struct Engine {
    cmd_tx: mpsc::Sender<Command>,
    handshake: OpenPacket,
    state: Arc<AtomicU8>,
}

impl Engine {
    /// Perform the open handshake and spawn the engine task.
    ///
    /// On success the session is [`EngineState::Open`] and decoded packets
    /// are delivered on the returned channel until an
    /// [`EngineEvent::Closed`] terminates it.
    pub async fn connect(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>), EngineError> {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);
        let actor = EngineActor::open(config, connector, cmd_rx, event_tx).await?;
        let engine = Engine {
            cmd_tx,
            handshake: actor.open.clone(),
            state: actor.state.clone(),
        };
        tokio::spawn(actor.run());
        Ok((engine, event_rx))
    }

    /// The handshake payload of this session
    pub fn handshake(&self) -> &OpenPacket {
        &self.handshake
    }

    pub fn state(&self) -> EngineState {
        self.state.load(Ordering::Relaxed).into()
    }

    /// Queue one message for sending
    pub fn send(&self, msg: String) -> Result<(), EngineError> {
        self.send_packets(vec![Packet::Message(msg)])
    }

    /// Queue one message and its adjacent binary attachments atomically, so
    /// no other write can interleave between the message and its blobs
    pub fn send_with_bins(&self, msg: String, bins: Vec<Bytes>) -> Result<(), EngineError> {
        let mut packets = Vec::with_capacity(bins.len() + 1);
        packets.push(Packet::Message(msg));
        packets.extend(bins.into_iter().map(Packet::Binary));
        self.send_packets(packets)
    }

    fn send_packets(&self, packets: Vec<Packet>) -> Result<(), EngineError> {
        self.cmd_tx
            .try_send(Command::Packets(packets))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => EngineError::BufferFull,
                mpsc::error::TrySendError::Closed(_) => EngineError::Closed,
            })
    }

    /// Ask the engine task to close the session deliberately
    pub fn close(&self) {
        self.cmd_tx.try_send(Command::Close).ok();
    }
}

enum Step {
    Cmd(Option<Command>),
    Poll(Result<PollResponse, TransportError>),
    WsConnected(Result<(BoxWsSink, BoxWsStream), TransportError>),
    WsFrame(Option<Result<WsFrame, TransportError>>),
    PingTick,
}

struct EngineActor {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    open: OpenPacket,
    state: Arc<AtomicU8>,
    cmd_rx: mpsc::Receiver<Command>,
    events: mpsc::Sender<EngineEvent>,

    // Transport mode. Mutated only by the engine task.
    polling: bool,
    websocket: bool,
    probing: bool,
    /// Messages enqueued while the upgrade race is unresolved. They are
    /// flushed over whichever transport the race settles on.
    probe_buf: Vec<Packet>,

    poll_fut: Option<BoxFuture<Result<PollResponse, TransportError>>>,
    ws_connect_fut: Option<BoxFuture<Result<(BoxWsSink, BoxWsStream), TransportError>>>,
    ws_tx: Option<BoxWsSink>,
    ws_rx: Option<BoxWsStream>,

    ping_interval: tokio::time::Interval,
    pongs_missed: u32,
    max_pongs_missed: u32,
    /// Guard for the single silent re-handshake on an expired session id
    rehandshook: bool,
}

impl EngineActor {
    async fn open(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        cmd_rx: mpsc::Receiver<Command>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Self, EngineError> {
        let state = Arc::new(AtomicU8::new(EngineState::Opening as u8));

        let (open, ws) = if config.force_websockets {
            let (ws_tx, mut ws_rx) = connector
                .ws_connect(config.ws_url(None), config.extra_headers.clone())
                .await?;
            let open = Self::await_open_frame(&mut ws_rx).await?;
            (open, Some((ws_tx, ws_rx)))
        } else {
            let open = Self::polling_handshake(&config, connector.as_ref()).await?;
            (open, None)
        };
        tracing::debug!(sid = %open.sid, "engine session open");

        let websocket = ws.is_some();
        let (ws_tx, ws_rx) = ws.map(|(tx, rx)| (Some(tx), Some(rx))).unwrap_or((None, None));
        let mut ping_interval =
            tokio::time::interval(Duration::from_millis(open.ping_interval.max(1)));
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let max_pongs_missed = (open.ping_timeout / open.ping_interval.max(1)) as u32;

        Ok(Self {
            config,
            connector,
            state,
            cmd_rx,
            events,
            polling: !websocket,
            websocket,
            probing: false,
            probe_buf: Vec::new(),
            poll_fut: None,
            ws_connect_fut: None,
            ws_tx,
            ws_rx,
            ping_interval,
            pongs_missed: 0,
            max_pongs_missed,
            rehandshook: false,
            open,
        })
    }

    async fn polling_handshake(
        config: &EngineConfig,
        connector: &dyn Connector,
    ) -> Result<OpenPacket, EngineError> {
        let req = PollRequest::get(config.polling_url(None), config.extra_headers.clone());
        let res = connector.request(req).await?;
        if res.status >= 400 {
            return Err(Self::rejection(&res));
        }
        let messages = payload::decode(&res.body)?;
        let first = messages
            .first()
            .ok_or(EngineError::Packet(PacketParseError::InvalidPacketType(None)))?;
        match Packet::try_from(first.as_str())? {
            Packet::Open(open) => Ok(open),
            _ => Err(EngineError::Packet(PacketParseError::InvalidPacketType(None))),
        }
    }

    /// With a forced websocket the handshake happens on the websocket
    /// itself: the first text frame is the open packet.
    async fn await_open_frame(ws_rx: &mut BoxWsStream) -> Result<OpenPacket, EngineError> {
        while let Some(frame) = ws_rx.next().await {
            match Packet::try_from(frame?)? {
                Packet::Open(open) => return Ok(open),
                packet => {
                    tracing::trace!(?packet, "ignoring pre-open packet");
                }
            }
        }
        Err(EngineError::Transport(TransportError::Closed))
    }

    /// Interpret a rejected polling response through the fixed error code
    /// table
    fn rejection(res: &PollResponse) -> EngineError {
        match serde_json::from_str::<ServerError>(&res.body) {
            Ok(err) => EngineError::Handshake(HandshakeFailure::from_code(err.code)),
            Err(_) => EngineError::ServerRejection(res.status),
        }
    }

    async fn run(mut self) {
        self.state.store(EngineState::Open as u8, Ordering::Relaxed);
        // The first tick of an interval completes immediately
        self.ping_interval.tick().await;
        if self.should_probe() {
            self.ws_connect_fut = Some(
                self.connector
                    .ws_connect(self.config.ws_url(Some(&self.open.sid)), self.config.extra_headers.clone()),
            );
        }

        let reason = loop {
            if self.polling && self.poll_fut.is_none() {
                let req = PollRequest::get(
                    self.config.polling_url(Some(&self.open.sid)),
                    self.config.extra_headers.clone(),
                );
                self.poll_fut = Some(self.connector.request(req));
            }

            let poll_pending = self.poll_fut.is_some();
            let connect_pending = self.ws_connect_fut.is_some();
            let ws_open = self.ws_rx.is_some();
            let step = tokio::select! {
                cmd = self.cmd_rx.recv() => Step::Cmd(cmd),
                res = async { self.poll_fut.as_mut().expect("poll in flight").await },
                    if poll_pending => Step::Poll(res),
                res = async { self.ws_connect_fut.as_mut().expect("connect in flight").await },
                    if connect_pending => Step::WsConnected(res),
                frame = async { self.ws_rx.as_mut().expect("ws open").next().await },
                    if ws_open => Step::WsFrame(frame),
                _ = self.ping_interval.tick() => Step::PingTick,
            };

            let res = match step {
                Step::Cmd(None) => break CloseReason::Deliberate,
                Step::Cmd(Some(Command::Close)) => {
                    self.write_now(vec![Packet::Close]).await.ok();
                    break CloseReason::Deliberate;
                }
                Step::Cmd(Some(Command::Packets(packets))) => self.write(packets).await,
                Step::Poll(res) => {
                    self.poll_fut = None;
                    self.on_poll_response(res).await
                }
                Step::WsConnected(res) => {
                    self.ws_connect_fut = None;
                    match res {
                        Ok((ws_tx, ws_rx)) => {
                            self.ws_tx = Some(ws_tx);
                            self.ws_rx = Some(ws_rx);
                            self.start_probe().await
                        }
                        Err(err) => {
                            tracing::debug!(%err, "websocket probe connection failed");
                            self.abandon_probe().await
                        }
                    }
                }
                Step::WsFrame(frame) => self.on_ws_frame(frame).await,
                Step::PingTick => self.on_ping_tick().await,
            };
            if let Err(reason) = res {
                break reason;
            }
        };
        self.shutdown(reason).await;
    }

    fn should_probe(&self) -> bool {
        !self.websocket
            && !self.config.force_polling
            && !self.config.force_websockets
            && self.open.upgrades.iter().any(|up| up == "websocket")
    }

    /// Queue or send outbound packets depending on the upgrade race
    async fn write(&mut self, packets: Vec<Packet>) -> Result<(), CloseReason> {
        if self.probing {
            self.probe_buf.extend(packets);
            return Ok(());
        }
        self.write_now(packets).await
    }

    /// Send packets over the transport active right now
    async fn write_now(&mut self, packets: Vec<Packet>) -> Result<(), CloseReason> {
        if self.websocket {
            for packet in &packets {
                let frame = WsFrame::from(packet);
                let res = self
                    .ws_tx
                    .as_mut()
                    .expect("websocket mode without sink")
                    .send(frame)
                    .await;
                if let Err(err) = res {
                    tracing::debug!(%err, "websocket write failed");
                    self.emit(EngineEvent::Error(err.into())).await?;
                    return Err(CloseReason::TransportError);
                }
            }
            Ok(())
        } else {
            let body = payload::encode(&packets);
            let req = PollRequest::post(
                self.config.polling_url(Some(&self.open.sid)),
                self.config.extra_headers.clone(),
                body,
            );
            match self.connector.request(req).await {
                Ok(res) if res.status < 400 => Ok(()),
                Ok(res) => self.on_rejection(res).await,
                Err(err) => {
                    tracing::debug!(%err, "polling write failed");
                    self.emit(EngineEvent::Error(err.into())).await?;
                    Err(CloseReason::TransportError)
                }
            }
        }
    }

    async fn on_poll_response(
        &mut self,
        res: Result<PollResponse, TransportError>,
    ) -> Result<(), CloseReason> {
        let res = match res {
            Ok(res) => res,
            Err(err) if !self.polling => {
                // The polling channel expired mid-flight during the
                // upgrade; the websocket carries the session now
                tracing::trace!(%err, "discarding stale polling response");
                return Ok(());
            }
            Err(err) => {
                tracing::debug!(%err, "polling request failed");
                self.emit(EngineEvent::Error(err.into())).await?;
                return Err(CloseReason::TransportError);
            }
        };
        if res.status >= 400 {
            if !self.polling {
                return Ok(());
            }
            return self.on_rejection(res).await;
        }
        match payload::decode(&res.body) {
            Ok(messages) => {
                for msg in messages {
                    self.on_packet_str(&msg).await?;
                }
                Ok(())
            }
            Err(err) => {
                // A malformed body is reported but does not kill the session
                self.emit(EngineEvent::Error(err.into())).await
            }
        }
    }

    /// A rejected polling request: an expired session id gets one silent
    /// re-handshake, everything else surfaces and closes.
    async fn on_rejection(&mut self, res: PollResponse) -> Result<(), CloseReason> {
        let err = Self::rejection(&res);
        if matches!(err, EngineError::Handshake(HandshakeFailure::UnknownSid)) && !self.rehandshook
        {
            self.rehandshook = true;
            tracing::debug!("session id expired, re-handshaking");
            match Self::polling_handshake(&self.config, self.connector.as_ref()).await {
                Ok(open) => {
                    self.apply_open(open);
                    return Ok(());
                }
                Err(err) => {
                    self.emit(EngineEvent::Error(err)).await?;
                    return Err(CloseReason::TransportError);
                }
            }
        }
        self.emit(EngineEvent::Error(err)).await?;
        Err(CloseReason::TransportError)
    }

    /// Reset the session around a fresh handshake
    fn apply_open(&mut self, open: OpenPacket) {
        tracing::debug!(sid = %open.sid, "engine session re-opened");
        self.ping_interval =
            tokio::time::interval(Duration::from_millis(open.ping_interval.max(1)));
        self.ping_interval
            .set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.max_pongs_missed = (open.ping_timeout / open.ping_interval.max(1)) as u32;
        self.pongs_missed = 0;
        self.polling = true;
        self.websocket = false;
        self.probing = false;
        self.poll_fut = None;
        self.ws_tx = None;
        self.ws_rx = None;
        self.open = open;
        if self.should_probe() {
            self.ws_connect_fut = Some(self.connector.ws_connect(
                self.config.ws_url(Some(&self.open.sid)),
                self.config.extra_headers.clone(),
            ));
        }
    }

    async fn on_ws_frame(
        &mut self,
        frame: Option<Result<WsFrame, TransportError>>,
    ) -> Result<(), CloseReason> {
        match frame {
            Some(Ok(frame)) => match Packet::try_from(frame) {
                Ok(packet) => self.on_packet(packet).await,
                Err(err) => self.emit(EngineEvent::Error(err.into())).await,
            },
            Some(Err(err)) if !self.websocket => {
                // The probe websocket died: fall back to polling
                tracing::debug!(%err, "websocket lost while probing");
                self.abandon_probe().await
            }
            Some(Err(err)) => {
                self.emit(EngineEvent::Error(err.into())).await?;
                Err(CloseReason::TransportError)
            }
            None if !self.websocket => self.abandon_probe().await,
            None => Err(CloseReason::TransportClose),
        }
    }

    async fn on_packet_str(&mut self, msg: &str) -> Result<(), CloseReason> {
        match Packet::try_from(msg) {
            Ok(packet) => self.on_packet(packet).await,
            Err(err) => self.emit(EngineEvent::Error(err.into())).await,
        }
    }

    async fn on_packet(&mut self, packet: Packet) -> Result<(), CloseReason> {
        match packet {
            Packet::Open(_) => {
                tracing::trace!("ignoring open packet on an open session");
                Ok(())
            }
            Packet::Close => Err(CloseReason::TransportClose),
            Packet::Pong => {
                self.pongs_missed = 0;
                self.emit(EngineEvent::Pong).await
            }
            Packet::PongProbe => self.finish_upgrade().await,
            Packet::Ping | Packet::PingProbe => {
                tracing::trace!("ignoring server ping");
                Ok(())
            }
            Packet::Message(msg) => self.emit(EngineEvent::Message(msg)).await,
            Packet::Binary(data) => self.emit(EngineEvent::Binary(data)).await,
            Packet::Upgrade | Packet::Noop => Ok(()),
        }
    }

    async fn start_probe(&mut self) -> Result<(), CloseReason> {
        tracing::debug!("probing websocket transport");
        self.probing = true;
        let ws = self.ws_tx.as_mut().expect("probe without sink");
        if ws.send(WsFrame::from(&Packet::PingProbe)).await.is_err() {
            return self.abandon_probe().await;
        }
        Ok(())
    }

    /// The server acknowledged the probe: commit to the websocket. From
    /// here on every frame, including the probe-hold buffer, goes over the
    /// websocket; the polling channel is never written to again.
    async fn finish_upgrade(&mut self) -> Result<(), CloseReason> {
        if !self.probing {
            return Ok(());
        }
        let ws = self.ws_tx.as_mut().expect("upgrade without sink");
        if ws.send(WsFrame::from(&Packet::Upgrade)).await.is_err() {
            return self.abandon_probe().await;
        }
        self.probing = false;
        self.polling = false;
        self.websocket = true;
        tracing::debug!("transport upgraded to websocket");
        let buffered = std::mem::take(&mut self.probe_buf);
        if buffered.is_empty() {
            Ok(())
        } else {
            self.write_now(buffered).await
        }
    }

    /// The websocket never panned out: stay on polling and flush whatever
    /// was held back during the probe
    async fn abandon_probe(&mut self) -> Result<(), CloseReason> {
        self.probing = false;
        self.ws_tx = None;
        self.ws_rx = None;
        let buffered = std::mem::take(&mut self.probe_buf);
        if buffered.is_empty() {
            Ok(())
        } else {
            self.write_now(buffered).await
        }
    }

    async fn on_ping_tick(&mut self) -> Result<(), CloseReason> {
        if self.pongs_missed > self.max_pongs_missed {
            tracing::debug!(
                missed = self.pongs_missed,
                "server stopped answering pings"
            );
            return Err(CloseReason::HeartbeatTimeout);
        }
        self.pongs_missed += 1;
        self.emit(EngineEvent::Ping).await?;
        // Pings bypass the probe hold: they keep the current transport alive
        self.write_now(vec![Packet::Ping]).await
    }

    async fn emit(&self, event: EngineEvent) -> Result<(), CloseReason> {
        // The receiver half is the client; if it is gone the session has no
        // reason to live
        self.events
            .send(event)
            .await
            .map_err(|_| CloseReason::Deliberate)
    }

    async fn shutdown(mut self, reason: CloseReason) {
        self.state.store(EngineState::Closed as u8, Ordering::Relaxed);
        // Dropping the in-flight poll invalidates the polling session: a
        // response arriving after close is never processed
        self.poll_fut = None;
        self.ws_connect_fut = None;
        self.ws_rx = None;
        if let Some(mut ws) = self.ws_tx.take() {
            ws.close().await.ok();
        }
        tracing::debug!(?reason, "engine closed");
        self.events.send(EngineEvent::Closed(reason)).await.ok();
    }
}
