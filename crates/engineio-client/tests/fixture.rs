//! A scripted [`Connector`] double driving the engine without any I/O.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use engineio_client::{
    Connector, Packet, TransportError, WsFrame,
    packet::OpenPacket,
    payload,
    transport::{BoxFuture, BoxWsSink, BoxWsStream, PollRequest, PollResponse},
};
use futures_core::Stream;
use futures_util::Sink;
use tokio::sync::{Notify, mpsc};

/// Show engine traces in tests with `RUST_LOG=engineio_client=trace`
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// One websocket accepted by the mock, seen from the server side
pub struct WsSession {
    /// Frames pushed here are delivered to the engine
    pub tx: mpsc::UnboundedSender<Result<WsFrame, TransportError>>,
    /// Frames the engine sent
    pub rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl WsSession {
    pub fn send_packet(&self, packet: &Packet) {
        self.tx.send(Ok(WsFrame::from(packet))).unwrap();
    }

    pub async fn next_frame(&mut self) -> WsFrame {
        self.rx.recv().await.expect("ws session closed")
    }
}

#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<MockInner>,
}

pub struct MockInner {
    open: Mutex<OpenPacket>,
    handshake_failures: AtomicUsize,
    handshake_count: AtomicUsize,

    poll_bodies: Mutex<VecDeque<String>>,
    poll_notify: Notify,

    posts: Mutex<Vec<String>>,
    post_notify: Notify,
    /// Answer every posted ping with a pong on the polling channel
    auto_pong: AtomicBool,
    /// Reject the next POST with this structured error code
    fail_next_post_with: Mutex<Option<i64>>,

    ws_enabled: AtomicBool,
    ws_sessions: Mutex<VecDeque<WsSession>>,
    ws_notify: Notify,
}

impl MockConnector {
    pub fn new() -> Self {
        init_tracing();
        let open = OpenPacket {
            sid: "sid0".to_owned(),
            upgrades: Vec::new(),
            ping_interval: 25_000,
            ping_timeout: 60_000,
        };
        Self {
            inner: Arc::new(MockInner {
                open: Mutex::new(open),
                handshake_failures: AtomicUsize::new(0),
                handshake_count: AtomicUsize::new(0),
                poll_bodies: Mutex::new(VecDeque::new()),
                poll_notify: Notify::new(),
                posts: Mutex::new(Vec::new()),
                post_notify: Notify::new(),
                auto_pong: AtomicBool::new(true),
                fail_next_post_with: Mutex::new(None),
                ws_enabled: AtomicBool::new(false),
                ws_sessions: Mutex::new(VecDeque::new()),
                ws_notify: Notify::new(),
            }),
        }
    }

    pub fn with_websocket(self) -> Self {
        self.inner.ws_enabled.store(true, Ordering::SeqCst);
        self.inner
            .open
            .lock()
            .unwrap()
            .upgrades
            .push("websocket".to_owned());
        self
    }

    pub fn with_heartbeat(self, interval_ms: u64, timeout_ms: u64) -> Self {
        let mut open = self.inner.open.lock().unwrap();
        open.ping_interval = interval_ms;
        open.ping_timeout = timeout_ms;
        drop(open);
        self
    }

    pub fn auto_pong(&self, enabled: bool) {
        self.inner.auto_pong.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_handshakes(&self, count: usize) {
        self.inner.handshake_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_post_with(&self, code: i64) {
        *self.inner.fail_next_post_with.lock().unwrap() = Some(code);
    }

    pub fn handshake_count(&self) -> usize {
        self.inner.handshake_count.load(Ordering::SeqCst)
    }

    /// Queue one polling response body made of the given packets
    pub fn push_packets(&self, packets: &[Packet]) {
        self.push_poll_body(payload::encode(packets));
    }

    pub fn push_poll_body(&self, body: impl Into<String>) {
        self.inner.poll_bodies.lock().unwrap().push_back(body.into());
        self.inner.poll_notify.notify_waiters();
    }

    pub fn posts(&self) -> Vec<String> {
        self.inner.posts.lock().unwrap().clone()
    }

    /// Wait until a POST body matching the predicate was captured
    pub async fn wait_for_post(&self, pred: impl Fn(&str) -> bool) -> String {
        loop {
            let notified = self.inner.post_notify.notified();
            if let Some(body) = self.inner.posts.lock().unwrap().iter().find(|b| pred(b)) {
                return body.clone();
            }
            notified.await;
        }
    }

    /// Wait for the next websocket the engine opened
    pub async fn next_ws_session(&self) -> WsSession {
        loop {
            let notified = self.inner.ws_notify.notified();
            if let Some(session) = self.inner.ws_sessions.lock().unwrap().pop_front() {
                return session;
            }
            notified.await;
        }
    }

    fn handshake_body(&self) -> String {
        let count = self.inner.handshake_count.fetch_add(1, Ordering::SeqCst);
        let mut open = self.inner.open.lock().unwrap().clone();
        open.sid = format!("sid{count}");
        payload::encode(&[Packet::Open(open)])
    }
}

impl Connector for MockConnector {
    fn request(&self, req: PollRequest) -> BoxFuture<Result<PollResponse, TransportError>> {
        let inner = self.inner.clone();
        let this = self.clone();
        let is_handshake = !req
            .url
            .query()
            .unwrap_or_default()
            .contains("sid=");
        Box::pin(async move {
            if req.method == http::Method::GET && is_handshake {
                if inner
                    .handshake_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err(TransportError::Http("handshake refused".to_owned()));
                }
                Ok(PollResponse {
                    status: 200,
                    body: this.handshake_body(),
                })
            } else if req.method == http::Method::GET {
                loop {
                    let notified = inner.poll_notify.notified();
                    if let Some(body) = inner.poll_bodies.lock().unwrap().pop_front() {
                        return Ok(PollResponse { status: 200, body });
                    }
                    notified.await;
                }
            } else {
                if let Some(code) = inner.fail_next_post_with.lock().unwrap().take() {
                    return Ok(PollResponse {
                        status: 400,
                        body: format!("{{\"code\":{code},\"message\":\"rejected\"}}"),
                    });
                }
                let body = req.body.unwrap_or_default();
                let is_ping = payload::decode(&body)
                    .map(|msgs| msgs.iter().any(|m| m == "2"))
                    .unwrap_or(false);
                inner.posts.lock().unwrap().push(body);
                inner.post_notify.notify_waiters();
                if is_ping && inner.auto_pong.load(Ordering::SeqCst) {
                    this.push_packets(&[Packet::Pong]);
                }
                Ok(PollResponse {
                    status: 200,
                    body: "ok".to_owned(),
                })
            }
        })
    }

    fn ws_connect(
        &self,
        _url: url::Url,
        _headers: http::HeaderMap,
    ) -> BoxFuture<Result<(BoxWsSink, BoxWsStream), TransportError>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if !inner.ws_enabled.load(Ordering::SeqCst) {
                return Err(TransportError::Ws("websocket refused".to_owned()));
            }
            let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
            let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
            inner.ws_sessions.lock().unwrap().push_back(WsSession {
                tx: to_client_tx,
                rx: from_client_rx,
            });
            inner.ws_notify.notify_waiters();
            Ok((
                Box::pin(ChannelSink(from_client_tx)) as BoxWsSink,
                Box::pin(ChannelStream(to_client_rx)) as BoxWsStream,
            ))
        })
    }
}

struct ChannelSink(mpsc::UnboundedSender<WsFrame>);

impl Sink<WsFrame> for ChannelSink {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
    fn start_send(self: Pin<&mut Self>, frame: WsFrame) -> Result<(), Self::Error> {
        self.0.send(frame).map_err(|_| TransportError::Closed)
    }
    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<Result<WsFrame, TransportError>>);

impl Stream for ChannelStream {
    type Item = Result<WsFrame, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}
