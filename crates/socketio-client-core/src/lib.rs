#![warn(
    clippy::all,
    clippy::todo,
    clippy::empty_enum,
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

//! Core types and packet codec for the socket.io client.
//!
//! This crate holds everything that is shared between the engine layer and
//! the client layer:
//! * [`Value`]: the canonical in-memory representation of packet payloads.
//! * [`Packet`]: the socket.io packet model.
//! * [`parser`]: the wire codec for the common packet format:
//!   ```text
//!   <packet type>[<# of binary attachments>-][<namespace>,][<acknowledgment id>][JSON-stringified payload without binary]
//!   + binary attachments extracted
//!   ```

pub mod packet;
pub mod parser;
mod value;

pub use packet::{Packet, PacketType};
pub use parser::{EncodeError, ParseError, ParserState};
pub use value::Value;
