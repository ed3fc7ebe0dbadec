//! PUBACK, PUBREC, PUBREL and PUBCOMP share one layout: packet
//! identifier, optional reason code, optional properties. The v5 short
//! form omits reason and properties when the reason is success and no
//! properties are present, which also makes it byte-identical to the
//! v3.1.1 encoding.

use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::properties::Properties;
use crate::reason_codes::ReasonCode;
use bytes::{Buf, BufMut};

pub(crate) fn is_valid_publish_ack_reason_code(code: ReasonCode) -> bool {
    matches!(
        code,
        ReasonCode::Success
            | ReasonCode::NoMatchingSubscribers
            | ReasonCode::UnspecifiedError
            | ReasonCode::ImplementationSpecificError
            | ReasonCode::NotAuthorized
            | ReasonCode::TopicNameInvalid
            | ReasonCode::PacketIdentifierInUse
            | ReasonCode::QuotaExceeded
            | ReasonCode::PayloadFormatInvalid
    )
}

pub(crate) fn is_valid_release_reason_code(code: ReasonCode) -> bool {
    matches!(
        code,
        ReasonCode::Success | ReasonCode::PacketIdentifierNotFound
    )
}

macro_rules! define_ack_packet {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
        packet_type = $packet_type:expr;
        flags = $flags:expr;
        validator = $validator:path;
        error_prefix = $prefix:literal;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            pub packet_id: u16,
            pub reason_code: ReasonCode,
            pub properties: Properties,
        }

        impl $name {
            #[must_use]
            pub fn new(packet_id: u16) -> Self {
                Self {
                    packet_id,
                    reason_code: ReasonCode::Success,
                    properties: Properties::default(),
                }
            }

            #[must_use]
            pub fn new_with_reason(packet_id: u16, reason_code: ReasonCode) -> Self {
                Self {
                    packet_id,
                    reason_code,
                    properties: Properties::default(),
                }
            }

            #[must_use]
            pub fn with_reason_string(mut self, reason: impl Into<String>) -> Self {
                self.properties.set_reason_string(reason);
                self
            }
        }

        impl MqttPacket for $name {
            fn packet_type(&self) -> PacketType {
                $packet_type
            }

            fn flags(&self) -> u8 {
                $flags
            }

            fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
                buf.put_u16(self.packet_id);

                // Shortened 2-byte form when nothing besides the
                // identifier needs to go on the wire.
                if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
                    buf.put_u8(self.reason_code.into());
                    if !self.properties.is_empty() {
                        self.properties.encode(buf)?;
                    }
                }
                Ok(())
            }

            fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
                if buf.remaining() < 2 {
                    return Err(MqttError::IncompletePacket);
                }
                let packet_id = buf.get_u16();

                let reason_code = if fixed_header.remaining_length >= 3 {
                    let byte = buf.get_u8();
                    let code = ReasonCode::from_u8(byte)
                        .ok_or(MqttError::InvalidReasonCode(byte))?;
                    if !$validator(code) {
                        return Err(MqttError::MalformedPacket(format!(
                            concat!("invalid ", $prefix, " reason code: {:?}"),
                            code
                        )));
                    }
                    code
                } else {
                    ReasonCode::Success
                };

                let properties = if fixed_header.remaining_length > 3 {
                    Properties::decode(buf)?
                } else {
                    Properties::default()
                };

                Ok(Self {
                    packet_id,
                    reason_code,
                    properties,
                })
            }
        }
    };
}

define_ack_packet! {
    /// QoS 1 publish acknowledgement.
    pub struct PubAckPacket;
    packet_type = PacketType::PubAck;
    flags = 0x00;
    validator = is_valid_publish_ack_reason_code;
    error_prefix = "PUBACK";
}

define_ack_packet! {
    /// First half of the QoS 2 handshake.
    pub struct PubRecPacket;
    packet_type = PacketType::PubRec;
    flags = 0x00;
    validator = is_valid_publish_ack_reason_code;
    error_prefix = "PUBREC";
}

define_ack_packet! {
    /// QoS 2 release. The fixed-header reserved flags must be 0b0010.
    pub struct PubRelPacket;
    packet_type = PacketType::PubRel;
    flags = 0x02;
    validator = is_valid_release_reason_code;
    error_prefix = "PUBREL";
}

define_ack_packet! {
    /// Terminal QoS 2 acknowledgement.
    pub struct PubCompPacket;
    packet_type = PacketType::PubComp;
    flags = 0x00;
    validator = is_valid_release_reason_code;
    error_prefix = "PUBCOMP";
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    fn round_trip<P: MqttPacket>(packet: &P) -> P {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        P::decode_body(&mut buf, &fixed_header).unwrap()
    }

    #[test]
    fn test_short_form_is_two_bytes() {
        let packet = PubAckPacket::new(123);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        // 1 type byte + 1 length byte + 2 identifier bytes
        assert_eq!(buf.len(), 4);
        assert_eq!(buf[1], 2);
    }

    #[test]
    fn test_short_form_round_trip() {
        let packet = PubCompPacket::new(456);
        let decoded = round_trip(&packet);
        assert_eq!(decoded, packet);
        assert_eq!(decoded.reason_code, ReasonCode::Success);
    }

    #[test]
    fn test_reason_only_form() {
        let packet = PubAckPacket::new_with_reason(7, ReasonCode::QuotaExceeded);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[1], 3);
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded = PubAckPacket::decode_body(&mut buf, &fixed_header).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_full_form_with_properties() {
        let packet = PubRecPacket::new_with_reason(8, ReasonCode::NotAuthorized)
            .with_reason_string("acl rejected");
        let decoded = round_trip(&packet);
        assert_eq!(decoded, packet);
        assert!(decoded.properties.reason_string().is_some());
    }

    #[test]
    fn test_pubrel_flags() {
        let packet = PubRelPacket::new(9);
        assert_eq!(packet.flags(), 0x02);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x62);
    }

    #[test]
    fn test_pubrel_orphan_reason_round_trip() {
        let packet = PubRelPacket::new_with_reason(10, ReasonCode::PacketIdentifierNotFound);
        assert_eq!(round_trip(&packet), packet);
    }

    #[test]
    fn test_invalid_reason_code_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u8(0x8D); // KeepAliveTimeout is not a PUBACK code
        let fixed_header = FixedHeader::new(PacketType::PubAck, 0, 3);
        assert!(PubAckPacket::decode_body(&mut buf, &fixed_header).is_err());
    }

    #[test]
    fn test_missing_packet_id_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        let fixed_header = FixedHeader::new(PacketType::PubAck, 0, 1);
        assert!(matches!(
            PubAckPacket::decode_body(&mut buf, &fixed_header),
            Err(MqttError::IncompletePacket)
        ));
    }

    proptest! {
        #[test]
        fn prop_puback_round_trip(packet_id in 1u16..=u16::MAX) {
            let packet = PubAckPacket::new(packet_id);
            prop_assert_eq!(round_trip(&packet), packet);
        }

        #[test]
        fn prop_pubrel_round_trip(packet_id in 1u16..=u16::MAX) {
            let packet = PubRelPacket::new(packet_id);
            prop_assert_eq!(round_trip(&packet), packet);
        }
    }
}
