use bytes::Bytes;

use crate::{
    Value,
    packet::{Packet, PacketType},
    parser::EncodeError,
};

/// Serialize a packet into its wire string, extracting binary attachments.
///
/// The payload is walked depth-first: every binary leaf is replaced in
/// place by a placeholder object and appended to the attachment list, and
/// the packet type is upgraded to its binary variant iff at least one
/// attachment was extracted. serde_json takes care of escaping control
/// bytes inside string values, which raw form would not be legal framing
/// inside the length-prefixed polling envelope.
pub(crate) fn serialize_packet(packet: &Packet) -> Result<(String, Vec<Bytes>), EncodeError> {
    let mut bins = Vec::new();
    let payload = if packet.data.is_empty() && !payload_always_present(packet.kind) {
        None
    } else {
        let items = packet
            .data
            .iter()
            .map(|value| deflate(value, &mut bins))
            .collect::<Result<Vec<_>, _>>()?;
        Some(serde_json::to_string(&serde_json::Value::Array(items))?)
    };

    let kind = base_kind(packet.kind, !bins.is_empty());
    let mut itoa_buf = itoa::Buffer::new();
    let mut out = String::with_capacity(
        8 + packet.ns.len() + payload.as_ref().map(String::len).unwrap_or(0),
    );
    out.push((b'0' + kind.index()) as char);
    if kind.is_binary() {
        out.push_str(itoa_buf.format(bins.len()));
        out.push('-');
    }
    serialize_nsp(&mut out, &packet.ns);
    if let Some(id) = packet.id {
        out.push_str(itoa_buf.format(id));
    }
    if let Some(payload) = payload {
        out.push_str(&payload);
    }
    Ok((out, bins))
}

/// Event and ack payloads are always an array on the wire, even when empty
fn payload_always_present(kind: PacketType) -> bool {
    matches!(
        kind,
        PacketType::Event | PacketType::Ack | PacketType::BinaryEvent | PacketType::BinaryAck
    )
}

/// The wire type is derived from the extracted attachments, whatever the
/// packet was constructed as
fn base_kind(kind: PacketType, binary: bool) -> PacketType {
    let base = match kind {
        PacketType::BinaryEvent => PacketType::Event,
        PacketType::BinaryAck => PacketType::Ack,
        other => other,
    };
    if binary { base.to_binary() } else { base }
}

/// The namespace segment is emitted only when not the root `/`, with a
/// leading slash added if missing and a comma separator
fn serialize_nsp(out: &mut String, nsp: &str) {
    if !nsp.is_empty() && nsp != "/" {
        if !nsp.starts_with('/') {
            out.push('/');
        }
        out.push_str(nsp);
        out.push(',');
    }
}

fn deflate(value: &Value, bins: &mut Vec<Bytes>) -> Result<serde_json::Value, EncodeError> {
    let out = match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .ok_or(EncodeError::Unrepresentable("non-finite number"))?,
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| deflate(item, bins))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), deflate(v, bins)?)))
                .collect::<Result<_, EncodeError>>()?,
        ),
        Value::Bytes(bin) => {
            let mut placeholder = serde_json::Map::with_capacity(2);
            placeholder.insert("_placeholder".to_owned(), serde_json::Value::Bool(true));
            placeholder.insert("num".to_owned(), serde_json::Value::Number(bins.len().into()));
            bins.push(bin.clone());
            serde_json::Value::Object(placeholder)
        }
    };
    Ok(out)
}
