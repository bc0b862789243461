//! Socket.io packet implementation.
//! The [`Packet`] is the base unit of data that is sent over the engine.io
//! connection.

use bytes::Bytes;

use crate::Value;

/// | Type          | ID  | Usage                                                                                 |
/// |---------------|-----|---------------------------------------------------------------------------------------|
/// | CONNECT       | 0   | Used during the connection to a namespace.                                            |
/// | DISCONNECT    | 1   | Used when disconnecting from a namespace.                                             |
/// | EVENT         | 2   | Used to send data to the other side.                                                  |
/// | ACK           | 3   | Used to acknowledge an event.                                                         |
/// | ERROR         | 4   | Used by the server to signal a namespace or middleware error.                         |
/// | BINARY_EVENT  | 5   | Used to send binary data to the other side.                                           |
/// | BINARY_ACK    | 6   | Used to acknowledge an event (the response includes binary data).                     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    Error,
    BinaryEvent,
    BinaryAck,
}

impl PacketType {
    /// Returns the wire index of the packet type
    pub fn index(self) -> u8 {
        match self {
            PacketType::Connect => 0,
            PacketType::Disconnect => 1,
            PacketType::Event => 2,
            PacketType::Ack => 3,
            PacketType::Error => 4,
            PacketType::BinaryEvent => 5,
            PacketType::BinaryAck => 6,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(PacketType::Connect),
            1 => Some(PacketType::Disconnect),
            2 => Some(PacketType::Event),
            3 => Some(PacketType::Ack),
            4 => Some(PacketType::Error),
            5 => Some(PacketType::BinaryEvent),
            6 => Some(PacketType::BinaryAck),
            _ => None,
        }
    }

    /// Check if the packet type is a binary variant (either binary event or
    /// binary ack)
    pub fn is_binary(self) -> bool {
        matches!(self, PacketType::BinaryEvent | PacketType::BinaryAck)
    }

    /// The binary variant of this packet type. The type of a packet is
    /// derived from its payload, never chosen by the caller.
    pub(crate) fn to_binary(self) -> Self {
        match self {
            PacketType::Event => PacketType::BinaryEvent,
            PacketType::Ack => PacketType::BinaryAck,
            other => other,
        }
    }
}

/// A socket.io packet. Each packet has a type and a namespace.
///
/// For binary variants the payload tree in `data` contains placeholder
/// objects until all `placeholder_count()` blobs have been received through
/// [`Packet::add_bin`]; only then is the packet *complete* and safe to
/// dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketType,
    /// The namespace the packet belongs to
    pub ns: String,
    /// The acknowledgement id, when an ack is expected or being answered
    pub id: Option<i64>,
    /// The payload, one [`Value`] per argument
    pub data: Vec<Value>,
    /// Binary attachments, in placeholder order
    pub bins: Vec<Bytes>,
    /// The number of attachments announced on the wire
    pub(crate) placeholders: usize,
}

impl Packet {
    /// Create a connect packet for the given namespace
    pub fn connect(ns: impl Into<String>) -> Self {
        Self::new(PacketType::Connect, ns.into(), Vec::new())
    }

    /// Create a disconnect packet for the given namespace
    pub fn disconnect(ns: impl Into<String>) -> Self {
        Self::new(PacketType::Disconnect, ns.into(), Vec::new())
    }

    /// Create an event packet for the given namespace.
    /// If the payload contains adjacent binary data, it will be a binary
    /// packet.
    pub fn event(ns: impl Into<String>, data: Vec<Value>) -> Self {
        Self::new(PacketType::Event, ns.into(), data)
    }

    /// Create an ack packet for the given namespace.
    /// If the payload contains adjacent binary data, it will be a binary
    /// packet.
    pub fn ack(ns: impl Into<String>, data: Vec<Value>, ack: i64) -> Self {
        let mut packet = Self::new(PacketType::Ack, ns.into(), data);
        packet.id = Some(ack);
        packet
    }

    fn new(kind: PacketType, ns: String, data: Vec<Value>) -> Self {
        let kind = if data.iter().any(Value::contains_binary) {
            kind.to_binary()
        } else {
            kind
        };
        Self {
            kind,
            ns,
            id: None,
            data,
            bins: Vec::new(),
            placeholders: 0,
        }
    }

    /// Set the ack id for the packet.
    /// It will only set the ack id for the packets that support it.
    pub fn set_ack_id(&mut self, ack_id: i64) {
        if matches!(
            self.kind,
            PacketType::Event | PacketType::BinaryEvent | PacketType::Ack | PacketType::BinaryAck
        ) {
            self.id = Some(ack_id);
        }
    }

    pub fn is_binary(&self) -> bool {
        self.kind.is_binary()
    }

    /// The number of binary attachments announced by the wire header
    pub fn placeholder_count(&self) -> usize {
        self.placeholders
    }

    /// Whether all announced attachments have been received
    pub fn is_complete(&self) -> bool {
        self.bins.len() >= self.placeholders
    }

    /// Append one binary attachment. Returns `true` exactly when the packet
    /// became complete, at which point all placeholders in the payload tree
    /// are substituted with their blob.
    pub fn add_bin(&mut self, bin: Bytes) -> bool {
        self.bins.push(bin);
        if self.is_complete() {
            for value in &mut self.data {
                value.substitute_placeholders(&self.bins);
            }
            true
        } else {
            false
        }
    }

    /// The event name of an event packet: the first payload element
    pub fn event_name(&self) -> Option<&str> {
        self.data.first().and_then(Value::as_str)
    }
}
