pub mod ack;
pub mod auth;
pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod publish;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

pub use ack::{PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket};
pub use auth::AuthPacket;
pub use connack::ConnAckPacket;
pub use connect::ConnectPacket;
pub use disconnect::DisconnectPacket;
pub use publish::PublishPacket;
pub use suback::{SubAckPacket, SubAckReasonCode};
pub use subscribe::{RetainHandling, SubscribePacket, SubscriptionOptions, TopicFilter};
pub use unsuback::UnsubAckPacket;
pub use unsubscribe::UnsubscribePacket;

use crate::buffer::DataBuffer;
use crate::encoding::{decode_variable_int, encode_variable_int};
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// MQTT control packet type. The discriminant is the high nibble of the
/// fixed header's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Connect),
            2 => Some(Self::ConnAck),
            3 => Some(Self::Publish),
            4 => Some(Self::PubAck),
            5 => Some(Self::PubRec),
            6 => Some(Self::PubRel),
            7 => Some(Self::PubComp),
            8 => Some(Self::Subscribe),
            9 => Some(Self::SubAck),
            10 => Some(Self::Unsubscribe),
            11 => Some(Self::UnsubAck),
            12 => Some(Self::PingReq),
            13 => Some(Self::PingResp),
            14 => Some(Self::Disconnect),
            15 => Some(Self::Auth),
            _ => None,
        }
    }

    /// Required flag nibble for packet types with reserved flags, `None`
    /// for PUBLISH whose flags carry dup/QoS/retain.
    #[must_use]
    pub fn required_flags(self) -> Option<u8> {
        match self {
            Self::Publish => None,
            Self::PubRel | Self::Subscribe | Self::Unsubscribe => Some(0x02),
            _ => Some(0x00),
        }
    }
}

/// First byte plus remaining-length varint of every control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    #[must_use]
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: u32) -> Self {
        Self {
            packet_type,
            flags,
            remaining_length,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(((self.packet_type as u8) << 4) | (self.flags & 0x0F));
        encode_variable_int(buf, self.remaining_length)
    }

    /// Decodes the first byte and the remaining-length varint. Validates
    /// the reserved flag nibble for every type except PUBLISH.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(MqttError::IncompletePacket);
        }
        let first = buf.get_u8();
        let type_nibble = first >> 4;
        let flags = first & 0x0F;

        let packet_type =
            PacketType::from_u8(type_nibble).ok_or(MqttError::InvalidPacketType(type_nibble))?;

        if let Some(required) = packet_type.required_flags() {
            if flags != required {
                return Err(MqttError::MalformedPacket(format!(
                    "invalid {packet_type:?} flags: expected 0x{required:02X}, got 0x{flags:02X}"
                )));
            }
        }

        let remaining_length = decode_variable_int(buf)?;
        Ok(Self {
            packet_type,
            flags,
            remaining_length,
        })
    }
}

/// Shared shape of every typed packet codec.
pub trait MqttPacket: Sized {
    fn packet_type(&self) -> PacketType;

    fn flags(&self) -> u8 {
        0
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()>;

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self>;

    /// Encodes the fixed header followed by the body.
    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        let remaining_length =
            u32::try_from(body.len()).map_err(|_| MqttError::PacketTooLarge {
                size: body.len(),
                max: crate::encoding::MAX_VARIABLE_INT as usize,
            })?;
        FixedHeader::new(self.packet_type(), self.flags(), remaining_length).encode(buf)?;
        buf.put_slice(&body);
        Ok(())
    }
}

/// Tagged union over the fifteen control packet types.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(Box<ConnectPacket>),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnAck(_) => PacketType::ConnAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck(_) => PacketType::PubAck,
            Self::PubRec(_) => PacketType::PubRec,
            Self::PubRel(_) => PacketType::PubRel,
            Self::PubComp(_) => PacketType::PubComp,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck(_) => PacketType::SubAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubAck(_) => PacketType::UnsubAck,
            Self::PingReq => PacketType::PingReq,
            Self::PingResp => PacketType::PingResp,
            Self::Disconnect(_) => PacketType::Disconnect,
            Self::Auth(_) => PacketType::Auth,
        }
    }

    /// Packet identifier when the variant carries one.
    #[must_use]
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Self::Publish(p) => p.packet_id,
            Self::PubAck(p) => Some(p.packet_id),
            Self::PubRec(p) => Some(p.packet_id),
            Self::PubRel(p) => Some(p.packet_id),
            Self::PubComp(p) => Some(p.packet_id),
            Self::Subscribe(p) => Some(p.packet_id),
            Self::SubAck(p) => Some(p.packet_id),
            Self::Unsubscribe(p) => Some(p.packet_id),
            Self::UnsubAck(p) => Some(p.packet_id),
            _ => None,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Self::Connect(p) => p.encode(buf),
            Self::ConnAck(p) => p.encode(buf),
            Self::Publish(p) => p.encode(buf),
            Self::PubAck(p) => p.encode(buf),
            Self::PubRec(p) => p.encode(buf),
            Self::PubRel(p) => p.encode(buf),
            Self::PubComp(p) => p.encode(buf),
            Self::Subscribe(p) => p.encode(buf),
            Self::SubAck(p) => p.encode(buf),
            Self::Unsubscribe(p) => p.encode(buf),
            Self::UnsubAck(p) => p.encode(buf),
            Self::PingReq => FixedHeader::new(PacketType::PingReq, 0, 0).encode(buf),
            Self::PingResp => FixedHeader::new(PacketType::PingResp, 0, 0).encode(buf),
            Self::Disconnect(p) => p.encode(buf),
            Self::Auth(p) => p.encode(buf),
        }
    }

    /// Decodes one packet body according to the fixed header and the
    /// connection's protocol version.
    pub fn decode_body<B: Buf>(
        fixed_header: &FixedHeader,
        buf: &mut B,
        protocol_version: u8,
    ) -> Result<Self> {
        let packet = match fixed_header.packet_type {
            PacketType::Connect => Packet::Connect(Box::new(ConnectPacket::decode_body(
                buf,
                fixed_header,
            )?)),
            PacketType::ConnAck => Packet::ConnAck(ConnAckPacket::decode_body_with_version(
                buf,
                fixed_header,
                protocol_version,
            )?),
            PacketType::Publish => Packet::Publish(PublishPacket::decode_body_with_version(
                buf,
                fixed_header,
                protocol_version,
            )?),
            PacketType::PubAck => Packet::PubAck(PubAckPacket::decode_body(buf, fixed_header)?),
            PacketType::PubRec => Packet::PubRec(PubRecPacket::decode_body(buf, fixed_header)?),
            PacketType::PubRel => Packet::PubRel(PubRelPacket::decode_body(buf, fixed_header)?),
            PacketType::PubComp => Packet::PubComp(PubCompPacket::decode_body(buf, fixed_header)?),
            PacketType::Subscribe => Packet::Subscribe(SubscribePacket::decode_body_with_version(
                buf,
                fixed_header,
                protocol_version,
            )?),
            PacketType::SubAck => Packet::SubAck(SubAckPacket::decode_body_with_version(
                buf,
                fixed_header,
                protocol_version,
            )?),
            PacketType::Unsubscribe => {
                Packet::Unsubscribe(UnsubscribePacket::decode_body_with_version(
                    buf,
                    fixed_header,
                    protocol_version,
                )?)
            }
            PacketType::UnsubAck => Packet::UnsubAck(UnsubAckPacket::decode_body_with_version(
                buf,
                fixed_header,
                protocol_version,
            )?),
            PacketType::PingReq => {
                expect_empty(fixed_header)?;
                Packet::PingReq
            }
            PacketType::PingResp => {
                expect_empty(fixed_header)?;
                Packet::PingResp
            }
            PacketType::Disconnect => {
                Packet::Disconnect(DisconnectPacket::decode_body_with_version(
                    buf,
                    fixed_header,
                    protocol_version,
                )?)
            }
            PacketType::Auth => Packet::Auth(AuthPacket::decode_body(buf, fixed_header)?),
        };
        Ok(packet)
    }
}

fn expect_empty(fixed_header: &FixedHeader) -> Result<()> {
    if fixed_header.remaining_length != 0 {
        return Err(MqttError::MalformedPacket(format!(
            "{:?} must have an empty body",
            fixed_header.packet_type
        )));
    }
    Ok(())
}

/// Decoder entry point used by the framers.
///
/// Produces one fully framed packet from the front of `buf`, or
/// [`MqttError::IncompletePacket`] without moving the cursor when the
/// buffer does not yet hold a complete frame.
pub fn decode_packet(buf: &mut DataBuffer, protocol_version: u8) -> Result<Packet> {
    let start = buf.cursor();

    let fixed_header = match FixedHeader::decode(buf) {
        Ok(header) => header,
        Err(err) => {
            if matches!(err, MqttError::IncompletePacket) {
                buf.reset_cursor(start);
            }
            return Err(err);
        }
    };

    if buf.readable_bytes() < fixed_header.remaining_length as usize {
        buf.reset_cursor(start);
        return Err(MqttError::IncompletePacket);
    }

    let mut body = buf.read_buffer(fixed_header.remaining_length as usize)?;
    let packet = Packet::decode_body(&fixed_header, &mut body, protocol_version)?;

    if body.readable_bytes() != 0 {
        return Err(MqttError::UnexpectedDataLength);
    }

    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::Properties;
    use crate::reason_codes::ReasonCode;
    use crate::types::QoS;
    use bytes::Bytes;

    fn encode_to_buffer(packet: &Packet) -> DataBuffer {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        DataBuffer::from_slice(&buf)
    }

    #[test]
    fn test_packet_type_round_trip() {
        for value in 1u8..=15 {
            let packet_type = PacketType::from_u8(value).unwrap();
            assert_eq!(packet_type as u8, value);
        }
        assert_eq!(PacketType::from_u8(0), None);
        assert_eq!(PacketType::from_u8(16), None);
    }

    #[test]
    fn test_fixed_header_round_trip() {
        let header = FixedHeader::new(PacketType::Publish, 0x0B, 321);
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        let decoded = FixedHeader::decode(&mut buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_fixed_header_rejects_bad_reserved_flags() {
        // SUBSCRIBE with flags 0x00 instead of 0x02.
        let mut buf = BytesMut::from(&[0x80u8, 0x00][..]);
        assert!(FixedHeader::decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_packet_incomplete_does_not_advance() {
        let publish = PublishPacket {
            topic: "a/b".to_string(),
            packet_id: Some(9),
            payload: Bytes::from_static(b"hello"),
            qos: QoS::AtLeastOnce,
            retain: false,
            dup: false,
            properties: Properties::default(),
            protocol_version: 5,
        };
        let full = encode_to_buffer(&Packet::Publish(publish.clone()));
        let bytes = full.as_slice();

        // Feed all but the last byte: decode must fail and leave the
        // cursor at the start so the framer can retry after more data.
        let mut partial = DataBuffer::from_slice(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            decode_packet(&mut partial, 5),
            Err(MqttError::IncompletePacket)
        ));
        assert_eq!(partial.cursor(), 0);

        partial.append_slice(&bytes[bytes.len() - 1..]);
        let decoded = decode_packet(&mut partial, 5).unwrap();
        assert_eq!(decoded, Packet::Publish(publish));
    }

    #[test]
    fn test_decode_two_packets_back_to_back() {
        let mut stream = DataBuffer::new();
        let ping = encode_to_buffer(&Packet::PingReq);
        let pub_ack = encode_to_buffer(&Packet::PubAck(PubAckPacket::new(3)));
        stream.append_slice(ping.as_slice());
        stream.append_slice(pub_ack.as_slice());

        assert_eq!(decode_packet(&mut stream, 5).unwrap(), Packet::PingReq);
        assert_eq!(
            decode_packet(&mut stream, 5).unwrap(),
            Packet::PubAck(PubAckPacket::new(3))
        );
        assert_eq!(stream.readable_bytes(), 0);
    }

    #[test]
    fn test_unknown_packet_type() {
        let mut buf = DataBuffer::from_slice(&[0x00, 0x00]);
        assert!(matches!(
            decode_packet(&mut buf, 5),
            Err(MqttError::InvalidPacketType(0))
        ));
    }

    #[test]
    fn test_pingreq_with_body_rejected() {
        let mut buf = DataBuffer::from_slice(&[0xC0, 0x01, 0x00]);
        assert!(decode_packet(&mut buf, 5).is_err());
    }

    #[test]
    fn test_codec_round_trip_every_type_v5() {
        let mut props = Properties::new();
        props.add_user_property("k".into(), "v".into());

        let packets = vec![
            Packet::Connect(Box::new(ConnectPacket::new("client-1", 5))),
            Packet::ConnAck(ConnAckPacket::new(ReasonCode::Success, false, 5)),
            Packet::Publish(PublishPacket {
                topic: "t".into(),
                packet_id: Some(1),
                payload: Bytes::from_static(b"h"),
                qos: QoS::ExactlyOnce,
                retain: true,
                dup: false,
                properties: props.clone(),
                protocol_version: 5,
            }),
            Packet::PubAck(PubAckPacket::new_with_reason(
                2,
                ReasonCode::NoMatchingSubscribers,
            )),
            Packet::PubRec(PubRecPacket::new(3)),
            Packet::PubRel(PubRelPacket::new(4)),
            Packet::PubComp(PubCompPacket::new(5)),
            Packet::Subscribe(
                SubscribePacket::new(6, 5).add_filter("a/+", QoS::AtLeastOnce),
            ),
            Packet::SubAck(SubAckPacket {
                packet_id: 6,
                reason_codes: vec![SubAckReasonCode::GrantedQoS1],
                properties: Properties::default(),
                protocol_version: 5,
            }),
            Packet::Unsubscribe(UnsubscribePacket {
                packet_id: 7,
                filters: vec!["a/+".into()],
                properties: Properties::default(),
                protocol_version: 5,
            }),
            Packet::UnsubAck(UnsubAckPacket {
                packet_id: 7,
                reason_codes: vec![ReasonCode::Success],
                properties: Properties::default(),
                protocol_version: 5,
            }),
            Packet::PingReq,
            Packet::PingResp,
            Packet::Disconnect(DisconnectPacket::new(ReasonCode::Success, 5)),
            Packet::Auth(AuthPacket::new(ReasonCode::ContinueAuthentication)),
        ];

        for packet in packets {
            let mut buf = encode_to_buffer(&packet);
            let decoded = decode_packet(&mut buf, 5).unwrap();
            assert_eq!(decoded, packet, "round trip failed for {packet:?}");
        }
    }

    #[test]
    fn test_codec_round_trip_every_type_v311() {
        let packets = vec![
            Packet::Connect(Box::new(ConnectPacket::new("client-1", 4))),
            Packet::ConnAck(ConnAckPacket::new(ReasonCode::Success, true, 4)),
            Packet::Publish(PublishPacket {
                topic: "t".into(),
                packet_id: None,
                payload: Bytes::from_static(b"x"),
                qos: QoS::AtMostOnce,
                retain: false,
                dup: false,
                properties: Properties::default(),
                protocol_version: 4,
            }),
            Packet::PubAck(PubAckPacket::new(2)),
            Packet::Subscribe(
                SubscribePacket::new(6, 4).add_filter("a/#", QoS::ExactlyOnce),
            ),
            Packet::SubAck(SubAckPacket {
                packet_id: 6,
                reason_codes: vec![SubAckReasonCode::GrantedQoS2],
                properties: Properties::default(),
                protocol_version: 4,
            }),
            Packet::Unsubscribe(UnsubscribePacket {
                packet_id: 7,
                filters: vec!["a/#".into()],
                properties: Properties::default(),
                protocol_version: 4,
            }),
            Packet::UnsubAck(UnsubAckPacket {
                packet_id: 7,
                reason_codes: Vec::new(),
                properties: Properties::default(),
                protocol_version: 4,
            }),
            Packet::Disconnect(DisconnectPacket::new(ReasonCode::Success, 4)),
        ];

        for packet in packets {
            let mut buf = encode_to_buffer(&packet);
            let decoded = decode_packet(&mut buf, 4).unwrap();
            assert_eq!(decoded, packet, "round trip failed for {packet:?}");
        }
    }
}
