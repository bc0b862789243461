#![warn(
    clippy::all,
    clippy::todo,
    clippy::mem_forget,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::if_let_mutex,
    clippy::await_holding_lock,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style
)]

//! Engine.IO client library for Rust.
//!
//! The engine owns the transport lifecycle beneath a socket.io connection:
//! the open handshake, the polling transport, the opportunistic upgrade to
//! a websocket, the ping/pong keep-alive and the message framing. It is
//! agnostic to the raw I/O: HTTP requests and websocket frames go through
//! the [`Connector`] capability, for which a production
//! [`HttpConnector`](connector::HttpConnector) is provided.
//!
//! All transport state is owned by a single task. Commands are submitted
//! through an [`Engine`] handle and decoded messages come back in arrival
//! order on an [`EngineEvent`] channel.

pub mod config;
pub mod connector;
mod engine;
pub mod packet;
pub mod payload;
pub mod transport;

mod errors;

pub use config::EngineConfig;
pub use engine::{Engine, EngineEvent, EngineState};
pub use errors::{CloseReason, EngineError, HandshakeFailure, TransportError};
pub use packet::{OpenPacket, Packet, PacketParseError};
pub use transport::{Connector, WsFrame};

/// The engine.io protocol revision this client speaks
pub const ENGINE_IO_VERSION: u8 = 3;
