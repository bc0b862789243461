//! The transport capability consumed by the engine.
//!
//! The engine does not perform raw I/O itself: it issues polling HTTP
//! requests and exchanges websocket frames through a [`Connector`]. One
//! production implementation exists
//! ([`HttpConnector`](crate::connector::HttpConnector)); tests drive the
//! engine with a scripted double.

use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use futures_core::{Future, Stream};
use futures_util::Sink;
use http::HeaderMap;
use url::Url;

use crate::{
    errors::TransportError,
    packet::{Packet, PacketParseError},
};

/// The sentinel byte prefixing binary payloads on websocket frames
pub const WS_BINARY_SENTINEL: u8 = 0x04;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + Sync>>;
/// The write half of a websocket connection
pub type BoxWsSink = Pin<Box<dyn Sink<WsFrame, Error = TransportError> + Send + Sync>>;
/// The read half of a websocket connection
pub type BoxWsStream = Pin<Box<dyn Stream<Item = Result<WsFrame, TransportError>> + Send + Sync>>;

/// A frame exchanged on the persistent transport
#[derive(Debug, Clone, PartialEq)]
pub enum WsFrame {
    Text(String),
    Binary(Bytes),
}

/// One polling HTTP request
#[derive(Debug)]
pub struct PollRequest {
    pub method: http::Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl PollRequest {
    pub fn get(url: Url, headers: HeaderMap) -> Self {
        Self {
            method: http::Method::GET,
            url,
            headers,
            body: None,
        }
    }

    pub fn post(url: Url, headers: HeaderMap, body: String) -> Self {
        Self {
            method: http::Method::POST,
            url,
            headers,
            body: Some(body),
        }
    }
}

/// One polling HTTP response. The body is returned for every status so the
/// engine can interpret structured error payloads.
#[derive(Debug)]
pub struct PollResponse {
    pub status: u16,
    pub body: String,
}

/// The raw I/O capability the engine is built on: issue one polling HTTP
/// request, or open a persistent full-duplex connection delivering frames
/// asynchronously.
pub trait Connector: Send + Sync + 'static {
    /// Issue one HTTP request and resolve with its response or an error
    fn request(&self, req: PollRequest) -> BoxFuture<Result<PollResponse, TransportError>>;

    /// Open a websocket connection and resolve with its two halves
    fn ws_connect(
        &self,
        url: Url,
        headers: HeaderMap,
    ) -> BoxFuture<Result<(BoxWsSink, BoxWsStream), TransportError>>;
}

/// Frame a packet for the websocket transport
impl From<&Packet> for WsFrame {
    fn from(packet: &Packet) -> Self {
        match packet {
            Packet::Binary(data) => {
                let mut framed = BytesMut::with_capacity(data.len() + 1);
                framed.put_u8(WS_BINARY_SENTINEL);
                framed.put_slice(data);
                WsFrame::Binary(framed.freeze())
            }
            packet => WsFrame::Text(String::from(packet)),
        }
    }
}

impl TryFrom<WsFrame> for Packet {
    type Error = PacketParseError;
    fn try_from(frame: WsFrame) -> Result<Self, Self::Error> {
        match frame {
            WsFrame::Text(text) => Packet::try_from(text.as_str()),
            WsFrame::Binary(data) if data.first() == Some(&WS_BINARY_SENTINEL) => {
                Ok(Packet::Binary(data.slice(1..)))
            }
            WsFrame::Binary(_) => Err(PacketParseError::InvalidPacketType(None)),
        }
    }
}
