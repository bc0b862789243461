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

//! Socket.IO client implementation in Rust.
//!
//! A [`Client`] owns one engine.io connection and multiplexes any number
//! of namespace [`Socket`]s over it. Sockets register event handlers,
//! emit events with optional acknowledgements, and survive transport
//! failures through the bounded reconnection policy.
//!
//! ```no_run
//! use socketio_client::{ClientBuilder, Value};
//!
//! # async fn doc() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBuilder::new("http://localhost:8087")?.build();
//! let socket = client.socket("/");
//! socket.on("reply", |args, _ack| println!("got {args:?}"));
//! client.connect().await?;
//! socket.emit("hello", vec![Value::from("world")])?;
//! # Ok(()) }
//! ```

pub mod ack;
mod client;
mod errors;
mod io;
mod socket;

pub use ack::{AckRegistry, NO_ACK};
pub use client::Client;
pub use errors::{AckError, BuilderError, ConnectError, SendError};
pub use io::{ClientBuilder, ClientConfig};
pub use socket::{AckSender, ConnectionState, HandlerId, Socket};

pub use engineio_client::{Connector, EngineState};
pub use socketio_client_core::{Packet, PacketType, Value};

/// Reserved client events, dispatched through the same handler registry as
/// server events
pub mod event {
    /// The namespace completed its connect handshake
    pub const CONNECT: &str = "connect";
    /// The namespace was disconnected; the one argument is the reason
    pub const DISCONNECT: &str = "disconnect";
    /// A recovered error: decode failures, transport errors, dropped emits.
    /// Observable in every socket state, connection attempts included.
    pub const ERROR: &str = "error";
    /// The reconnection policy started after an unexpected close
    pub const RECONNECT: &str = "reconnect";
    /// One reconnect attempt is about to run; the argument is the attempt
    /// number
    pub const RECONNECT_ATTEMPT: &str = "reconnectAttempt";
    /// The socket state changed; the argument is the new state name
    pub const STATUS_CHANGE: &str = "statusChange";
    /// A heartbeat ping was sent
    pub const PING: &str = "ping";
    /// A heartbeat pong was received
    pub const PONG: &str = "pong";
}
