use crate::packet::PacketParseError;

/// An error raised by the raw transport layer. Connectors map their own
/// error types into this so the engine stays I/O agnostic.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The HTTP request could not be executed
    #[error("http request failed: {0}")]
    Http(String),

    /// The websocket connection failed or errored mid-stream
    #[error("websocket failure: {0}")]
    Ws(String),

    /// The connection was closed by the peer
    #[error("transport closed")]
    Closed,
}

/// The fixed table of structured handshake error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// Code 0: the requested transport is not supported
    UnknownTransport,
    /// Code 1: the session id is not known (anymore). Triggers a single
    /// silent re-handshake with a cleared session id.
    UnknownSid,
    /// Code 2: bad handshake method
    BadHandshakeMethod,
    /// Code 3: bad request
    BadRequest,
    /// Any unrecognized code, surfaced as a generic engine error
    Other(i64),
}

impl HandshakeFailure {
    pub(crate) fn from_code(code: i64) -> Self {
        match code {
            0 => HandshakeFailure::UnknownTransport,
            1 => HandshakeFailure::UnknownSid,
            2 => HandshakeFailure::BadHandshakeMethod,
            3 => HandshakeFailure::BadRequest,
            other => HandshakeFailure::Other(other),
        }
    }
}

impl std::fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeFailure::UnknownTransport => write!(f, "unknown transport"),
            HandshakeFailure::UnknownSid => write!(f, "unknown session id"),
            HandshakeFailure::BadHandshakeMethod => write!(f, "bad handshake method"),
            HandshakeFailure::BadRequest => write!(f, "bad request"),
            HandshakeFailure::Other(code) => write!(f, "server error code {code}"),
        }
    }
}

/// Error type for the engine
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("bad packet: {0}")]
    Packet(#[from] PacketParseError),

    #[error("handshake rejected: {0}")]
    Handshake(HandshakeFailure),

    /// The server rejected a request without a structured error payload
    #[error("server rejected request with status {0}")]
    ServerRejection(u16),

    /// The outbound buffer is full, the packet was dropped
    #[error("engine write buffer full")]
    BufferFull,

    /// The engine is closed, no packet can be sent
    #[error("engine closed")]
    Closed,
}

/// Why an engine session ended. Everything except
/// [`CloseReason::Deliberate`] is an unexpected close and subject to the
/// client reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The local side asked for the close
    Deliberate,
    /// The server sent a close packet
    TransportClose,
    /// The transport failed
    TransportError,
    /// The server stopped answering pings
    HeartbeatTimeout,
}
