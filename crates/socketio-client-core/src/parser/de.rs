use std::io::Cursor;

use bytes::Buf;

use crate::{
    Value,
    packet::{Packet, PacketType},
    parser::ParseError,
};

/// Deserialize a packet from its wire string with a single left-to-right
/// scan. Separators are all ASCII so the scan can work on the byte slice.
pub(crate) fn deserialize_packet(data: &str) -> Result<Packet, ParseError> {
    if data.is_empty() {
        return Err(ParseError::InvalidPacketType);
    }
    let mut reader = Cursor::new(data.as_bytes());
    let index = reader.get_u8();
    let kind = index
        .checked_sub(b'0')
        .and_then(PacketType::from_index)
        .ok_or(ParseError::InvalidPacketType)?;

    let placeholders = if kind.is_binary() {
        read_attachments(&mut reader).ok_or(ParseError::InvalidAttachments)?
    } else {
        0
    };

    // Custom namespaces start with a slash, the root namespace is implicit
    let ns = if reader.has_remaining() && reader.chunk()[0] == b'/' {
        read_nsp(&mut reader, data)
    } else {
        "/".to_owned()
    };

    let id = match kind {
        PacketType::Event | PacketType::Ack | PacketType::BinaryEvent | PacketType::BinaryAck => {
            read_ack(&mut reader, data)
        }
        _ => None,
    };
    if matches!(kind, PacketType::Ack | PacketType::BinaryAck) && id.is_none() {
        return Err(ParseError::InvalidPacketType);
    }

    let data = read_trailer(kind, &data[reader.position() as usize..])?;
    Ok(Packet {
        kind,
        ns,
        id,
        data,
        bins: Vec::new(),
        placeholders,
    })
}

/// Attachment count: decimal digits terminated by a `-`. A binary variant
/// without a well-formed count is rejected.
fn read_attachments(reader: &mut Cursor<&[u8]>) -> Option<usize> {
    let data = *reader.get_ref();
    let start_index = reader.position() as usize;
    loop {
        match reader.has_remaining().then(|| reader.get_u8()) {
            Some(c) if c.is_ascii_digit() => (),
            Some(b'-') if reader.position() as usize > start_index + 1 => {
                break std::str::from_utf8(&data[start_index..reader.position() as usize - 1])
                    .ok()?
                    .parse()
                    .ok();
            }
            _ => break None,
        }
    }
}

fn read_nsp(reader: &mut Cursor<&[u8]>, data: &str) -> String {
    let start_index = reader.position() as usize;
    loop {
        match reader.has_remaining().then(|| reader.get_u8()) {
            Some(b',') => break data[start_index..reader.position() as usize - 1].to_owned(),
            // Depending on the client the namespace may not end with a
            // comma if it is the end of the packet, e.g. `1/custom`
            None => break data[start_index..reader.position() as usize].to_owned(),
            Some(_) => (),
        }
    }
}

/// Ack id: decimal digits running up to the payload trailer or the end of
/// the packet.
fn read_ack(reader: &mut Cursor<&[u8]>, data: &str) -> Option<i64> {
    let start_index = reader.position() as usize;
    loop {
        match reader.has_remaining().then(|| reader.chunk()[0]) {
            Some(c) if c.is_ascii_digit() => reader.advance(1),
            _ if reader.position() as usize > start_index => {
                break data[start_index..reader.position() as usize].parse().ok();
            }
            _ => break None,
        }
    }
}

/// The payload trailer is a JSON array, one element per argument, with
/// binary placeholders left in place. Error payloads are tolerant: servers
/// may send error data unwrapped, or not JSON-shaped at all.
fn read_trailer(kind: PacketType, trailer: &str) -> Result<Vec<Value>, ParseError> {
    if trailer.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<serde_json::Value>(trailer) {
        Ok(serde_json::Value::Array(items)) => Ok(items.into_iter().map(Value::from).collect()),
        Ok(other) if matches!(kind, PacketType::Error | PacketType::Connect) => {
            Ok(vec![Value::from(other)])
        }
        Ok(_) => Err(ParseError::InvalidData),
        Err(_) if kind == PacketType::Error => Ok(vec![Value::Str(trailer.to_owned())]),
        Err(err) => Err(ParseError::InvalidPayload(err)),
    }
}
