//! Engine.IO packet types and their text codec.

use base64::{Engine, engine::general_purpose};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A packet received from or sent to the server
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Open packet, carries the handshake payload. Only ever received.
    Open(OpenPacket),
    /// Close packet used to tear down the session
    Close,
    /// Ping packet of the heartbeat. The client sends it, the server
    /// answers with a [`Packet::Pong`].
    Ping,
    /// Pong packet answering a [`Packet::Ping`]
    Pong,

    /// Special ping packet probing a fresh websocket before committing to it
    PingProbe,
    /// Special pong packet acknowledging a [`Packet::PingProbe`]
    PongProbe,

    /// Message packet wrapping one socket.io packet
    Message(String),
    /// Upgrade packet committing the connection to the probed websocket
    Upgrade,
    /// Noop packet used by the server to release a pending polling request,
    /// typically while upgrading
    Noop,

    /// Binary packet.
    /// Converts to a base64 string with a `b4` prefix on the polling
    /// transport and to a websocket binary frame with a leading `0x04`
    /// sentinel byte otherwise. The encoding is picked at send time from
    /// the transport that actually carries the packet.
    Binary(Bytes),
}

/// An error that occurs when parsing a packet
#[derive(thiserror::Error, Debug)]
pub enum PacketParseError {
    /// The open packet payload is invalid
    #[error("invalid open packet: {0}")]
    InvalidOpenPacket(#[from] serde_json::Error),
    /// The packet type is invalid
    #[error("invalid packet type: {0:?}")]
    InvalidPacketType(Option<char>),
    /// A packet length prefix of the polling payload is invalid
    #[error("invalid packet length")]
    InvalidPacketLen,
    /// The base64 decoding of a polling binary packet failed
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl Packet {
    /// Check if the packet is a binary packet
    pub fn is_binary(&self) -> bool {
        matches!(self, Packet::Binary(_))
    }
}

/// Serialize a [`Packet`] to its polling text representation
impl From<&Packet> for String {
    fn from(packet: &Packet) -> String {
        let mut buffer = String::new();
        match packet {
            Packet::Open(open) => {
                buffer.push('0');
                buffer.push_str(&serde_json::to_string(open).unwrap());
            }
            Packet::Close => buffer.push('1'),
            Packet::Ping => buffer.push('2'),
            Packet::Pong => buffer.push('3'),
            Packet::PingProbe => buffer.push_str("2probe"),
            Packet::PongProbe => buffer.push_str("3probe"),
            Packet::Message(msg) => {
                buffer.reserve(msg.len() + 1);
                buffer.push('4');
                buffer.push_str(msg);
            }
            Packet::Upgrade => buffer.push('5'),
            Packet::Noop => buffer.push('6'),
            Packet::Binary(data) => {
                buffer.push_str("b4");
                general_purpose::STANDARD.encode_string(data, &mut buffer);
            }
        };
        buffer
    }
}
impl From<Packet> for String {
    fn from(packet: Packet) -> String {
        String::from(&packet)
    }
}

/// Deserialize a [`Packet`] from its polling text representation
impl TryFrom<&str> for Packet {
    type Error = PacketParseError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let packet_type = value
            .as_bytes()
            .first()
            .ok_or(PacketParseError::InvalidPacketType(None))?;
        let is_probe = value.len() == 6 && &value[1..6] == "probe";
        let res = match packet_type {
            b'0' => Packet::Open(serde_json::from_str(&value[1..])?),
            b'1' => Packet::Close,
            b'2' if is_probe => Packet::PingProbe,
            b'2' => Packet::Ping,
            b'3' if is_probe => Packet::PongProbe,
            b'3' => Packet::Pong,
            b'4' => Packet::Message(value[1..].to_owned()),
            b'5' => Packet::Upgrade,
            b'6' => Packet::Noop,
            b'b' if value.as_bytes().get(1) == Some(&b'4') => Packet::Binary(
                general_purpose::STANDARD.decode(&value.as_bytes()[2..])?.into(),
            ),
            c => Err(PacketParseError::InvalidPacketType(Some(*c as char)))?,
        };
        Ok(res)
    }
}

/// The open packet payload sent by the server to initiate a session
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    /// The session ID
    pub sid: String,
    /// The list of transports the server accepts an upgrade to
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// The heartbeat interval (in milliseconds)
    pub ping_interval: u64,
    /// The heartbeat timeout (in milliseconds)
    pub ping_timeout: u64,
}

/// The structured error payload of a rejected handshake or polling request
#[derive(Debug, Deserialize)]
pub(crate) struct ServerError {
    pub code: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_packet_deserialize() {
        let packet_str =
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":60000}"#;
        let packet = Packet::try_from(packet_str).unwrap();
        let Packet::Open(open) = packet else {
            panic!("expected open packet")
        };
        assert_eq!(open.sid, "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(open.upgrades, vec!["websocket".to_string()]);
        assert_eq!(open.ping_interval, 25000);
        assert_eq!(open.ping_timeout, 60000);
    }

    #[test]
    fn test_message_packet() {
        let packet = Packet::Message("hello".into());
        assert_eq!(String::from(&packet), "4hello");
        assert_eq!(Packet::try_from("4hello").unwrap(), packet);
    }

    #[test]
    fn test_probe_packets() {
        assert_eq!(String::from(&Packet::PingProbe), "2probe");
        assert_eq!(String::from(&Packet::PongProbe), "3probe");
        assert_eq!(Packet::try_from("2probe").unwrap(), Packet::PingProbe);
        assert_eq!(Packet::try_from("3probe").unwrap(), Packet::PongProbe);
        assert_eq!(Packet::try_from("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::try_from("3").unwrap(), Packet::Pong);
    }

    #[test]
    fn test_binary_packet_polling() {
        let packet = Packet::Binary(vec![1, 2, 3].into());
        assert_eq!(String::from(&packet), "b4AQID");
        assert_eq!(Packet::try_from("b4AQID").unwrap(), packet);
    }

    #[test]
    fn test_invalid_packets() {
        assert!(matches!(
            Packet::try_from(""),
            Err(PacketParseError::InvalidPacketType(None))
        ));
        assert!(matches!(
            Packet::try_from("9"),
            Err(PacketParseError::InvalidPacketType(Some('9')))
        ));
        // The only accepted base64 packet is a message
        assert!(matches!(
            Packet::try_from("b2AQID"),
            Err(PacketParseError::InvalidPacketType(Some('b')))
        ));
        assert!(matches!(
            Packet::try_from("b4$$$"),
            Err(PacketParseError::Base64Decode(_))
        ));
    }
}
