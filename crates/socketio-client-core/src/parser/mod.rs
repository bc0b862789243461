//! Wire codec for the socket.io common packet format.
//!
//! Text decoding is a single left-to-right scan with no backtracking.
//! Binary variants are held in a single pending slot on the [`ParserState`]
//! until all announced attachments have arrived; blobs always arrive in the
//! same relative order their packets were sent, so one slot is enough.

use std::sync::Mutex;

use bytes::Bytes;

use crate::Packet;

mod de;
mod ser;

/// Errors when parsing socket.io packets.
/// Decode errors are reported, never fatal: a malformed inbound packet must
/// not crash the connection.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// Invalid packet type digit
    #[error("invalid packet type")]
    InvalidPacketType,

    /// A binary variant was declared but the attachment count is missing or
    /// not numeric
    #[error("invalid attachments")]
    InvalidAttachments,

    /// The payload trailer is not a value sequence
    #[error("invalid data")]
    InvalidData,

    /// The payload trailer does not parse as JSON
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Needs more binary data before deserialization. It is not exactly an
    /// error, it is used for control flow: the caller should feed the next
    /// binary payload with [`decode_bin`].
    #[error("needs more binary data before deserialization")]
    NeedsMoreBinaryData,

    /// Received a binary payload without a pending binary packet
    #[error("received unexpected binary data")]
    UnexpectedBinaryPacket,
}

/// Errors when serializing a packet. Surfaced to the caller as a client
/// error event; the emit is dropped, not retried.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    /// A payload value has no JSON representation (e.g. a non-finite float)
    #[error("value cannot be represented: {0}")]
    Unrepresentable(&'static str),

    /// JSON serialization failed
    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decoding state shared across packets of one logical connection: the
/// single pending-binary slot.
#[derive(Debug, Default)]
pub struct ParserState {
    partial: Mutex<Option<Packet>>,
}

/// Decode a packet from its wire string.
///
/// If the packet is a binary variant with pending attachments it is parked
/// on the `state` and [`ParseError::NeedsMoreBinaryData`] is returned.
pub fn decode_str(state: &ParserState, data: &str) -> Result<Packet, ParseError> {
    let packet = de::deserialize_packet(data)?;
    if packet.is_binary() && !packet.is_complete() {
        *state.partial.lock().unwrap() = Some(packet);
        Err(ParseError::NeedsMoreBinaryData)
    } else {
        Ok(packet)
    }
}

/// Feed one binary attachment to the pending binary packet.
///
/// Returns the completed packet once all announced attachments arrived,
/// [`ParseError::NeedsMoreBinaryData`] while more are expected.
pub fn decode_bin(state: &ParserState, bin: Bytes) -> Result<Packet, ParseError> {
    let mut slot = state.partial.lock().unwrap();
    match slot.as_mut() {
        Some(packet) => {
            if packet.add_bin(bin) {
                Ok(slot.take().unwrap())
            } else {
                Err(ParseError::NeedsMoreBinaryData)
            }
        }
        None => Err(ParseError::UnexpectedBinaryPacket),
    }
}

/// Encode a packet to its wire string plus the extracted binary
/// attachments, in placeholder order.
pub fn encode(packet: &Packet) -> Result<(String, Vec<Bytes>), EncodeError> {
    ser::serialize_packet(packet)
}
