//! Polling payload framing.
//!
//! The polling transport may carry multiple engine.io packets concatenated
//! in one HTTP body, each prefixed by `<decimalLength>:` where the length
//! counts characters, not bytes.

use crate::packet::{Packet, PacketParseError};

/// Encode a batch of packets into one polling request body
pub fn encode<'a>(packets: impl IntoIterator<Item = &'a Packet>) -> String {
    let mut itoa_buf = itoa::Buffer::new();
    let mut out = String::new();
    for packet in packets {
        let encoded = String::from(packet);
        out.push_str(itoa_buf.format(encoded.chars().count()));
        out.push(':');
        out.push_str(&encoded);
    }
    out
}

/// Split a polling response body into its packet strings.
///
/// A body without any delimiter is a no-op heartbeat and yields nothing.
/// A declared length running past the end of the body takes the rest of
/// the body: some servers count lengths in UTF-16 code units.
pub fn decode(body: &str) -> Result<Vec<String>, PacketParseError> {
    if !body.contains(':') {
        return Ok(Vec::new());
    }
    let mut packets = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let sep = rest.find(':').ok_or(PacketParseError::InvalidPacketLen)?;
        let len: usize = rest[..sep]
            .parse()
            .map_err(|_| PacketParseError::InvalidPacketLen)?;
        let message = &rest[sep + 1..];
        let end = message
            .char_indices()
            .nth(len)
            .map(|(idx, _)| idx)
            .unwrap_or(message.len());
        packets.push(message[..end].to_owned());
        rest = &message[end..];
    }
    Ok(packets)
}
