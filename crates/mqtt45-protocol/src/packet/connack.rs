use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::properties::Properties;
use crate::reason_codes::{ConnectReturnCode, ReasonCode};
use bytes::{Buf, BufMut};

/// CONNACK. The second byte is a v3 return code or a v5 reason code
/// depending on the negotiated protocol version; both views are kept so
/// callers can report the one that was actually on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub reason_code: ReasonCode,
    /// Populated on v3.1.1 connections only.
    pub return_code: Option<ConnectReturnCode>,
    pub properties: Properties,
    pub protocol_version: u8,
}

impl ConnAckPacket {
    #[must_use]
    pub fn new(reason_code: ReasonCode, session_present: bool, protocol_version: u8) -> Self {
        let return_code = (protocol_version == 4).then(|| v5_to_v3(reason_code));
        Self {
            session_present,
            reason_code,
            return_code,
            properties: Properties::default(),
            protocol_version,
        }
    }

    pub fn decode_body_with_version<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        protocol_version: u8,
    ) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::IncompletePacket);
        }

        let ack_flags = buf.get_u8();
        if ack_flags & 0xFE != 0 {
            return Err(MqttError::MalformedPacket(
                "CONNACK acknowledge flags bits 1-7 must be 0".to_string(),
            ));
        }
        let session_present = ack_flags & 0x01 != 0;

        let code_byte = buf.get_u8();
        let (reason_code, return_code, properties) = if protocol_version == 5 {
            let reason = ReasonCode::from_u8(code_byte)
                .ok_or(MqttError::InvalidReasonCode(code_byte))?;
            let properties = Properties::decode(buf)?;
            (reason, None, properties)
        } else {
            let return_code = ConnectReturnCode::from_u8(code_byte)
                .ok_or(MqttError::InvalidReasonCode(code_byte))?;
            (v3_to_v5(return_code), Some(return_code), Properties::default())
        };

        Ok(Self {
            session_present,
            reason_code,
            return_code,
            properties,
            protocol_version,
        })
    }
}

impl MqttPacket for ConnAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(u8::from(self.session_present));

        if self.protocol_version == 5 {
            buf.put_u8(self.reason_code.into());
            self.properties.encode(buf)?;
        } else {
            let return_code = self.return_code.unwrap_or_else(|| v5_to_v3(self.reason_code));
            buf.put_u8(return_code.into());
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        Self::decode_body_with_version(buf, fixed_header, 5)
    }
}

fn v3_to_v5(code: ConnectReturnCode) -> ReasonCode {
    match code {
        ConnectReturnCode::Accepted => ReasonCode::Success,
        ConnectReturnCode::UnacceptableProtocolVersion => ReasonCode::UnsupportedProtocolVersion,
        ConnectReturnCode::IdentifierRejected => ReasonCode::ClientIdentifierNotValid,
        ConnectReturnCode::ServerUnavailable => ReasonCode::ServerUnavailable,
        ConnectReturnCode::BadUsernameOrPassword => ReasonCode::BadUsernameOrPassword,
        ConnectReturnCode::NotAuthorized => ReasonCode::NotAuthorized,
    }
}

fn v5_to_v3(code: ReasonCode) -> ConnectReturnCode {
    match code {
        ReasonCode::Success => ConnectReturnCode::Accepted,
        ReasonCode::UnsupportedProtocolVersion => ConnectReturnCode::UnacceptableProtocolVersion,
        ReasonCode::ClientIdentifierNotValid => ConnectReturnCode::IdentifierRejected,
        ReasonCode::ServerUnavailable | ReasonCode::ServerBusy => {
            ConnectReturnCode::ServerUnavailable
        }
        ReasonCode::BadUsernameOrPassword => ConnectReturnCode::BadUsernameOrPassword,
        _ => ConnectReturnCode::NotAuthorized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{PropertyId, PropertyValue};
    use bytes::BytesMut;

    fn round_trip(packet: &ConnAckPacket, version: u8) -> ConnAckPacket {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        ConnAckPacket::decode_body_with_version(&mut buf, &fixed_header, version).unwrap()
    }

    #[test]
    fn test_v5_round_trip_with_properties() {
        let mut packet = ConnAckPacket::new(ReasonCode::Success, true, 5);
        packet
            .properties
            .add(PropertyId::ServerKeepAlive, PropertyValue::TwoByteInteger(25))
            .unwrap();
        packet
            .properties
            .add(PropertyId::MaximumQoS, PropertyValue::Byte(1))
            .unwrap();
        let decoded = round_trip(&packet, 5);
        assert_eq!(decoded, packet);
        assert_eq!(decoded.properties.server_keep_alive(), Some(25));
    }

    #[test]
    fn test_v311_return_code_round_trip() {
        let packet = ConnAckPacket::new(ReasonCode::BadUsernameOrPassword, false, 4);
        let decoded = round_trip(&packet, 4);
        assert_eq!(decoded, packet);
        assert_eq!(
            decoded.return_code,
            Some(ConnectReturnCode::BadUsernameOrPassword)
        );
    }

    #[test]
    fn test_invalid_ack_flags_rejected() {
        let mut buf = BytesMut::from(&[0x02u8, 0x00, 0x00][..]);
        let fixed_header = FixedHeader::new(PacketType::ConnAck, 0, 3);
        assert!(ConnAckPacket::decode_body_with_version(&mut buf, &fixed_header, 5).is_err());
    }

    #[test]
    fn test_invalid_v3_return_code_rejected() {
        let mut buf = BytesMut::from(&[0x00u8, 0x06][..]);
        let fixed_header = FixedHeader::new(PacketType::ConnAck, 0, 2);
        assert!(matches!(
            ConnAckPacket::decode_body_with_version(&mut buf, &fixed_header, 4),
            Err(MqttError::InvalidReasonCode(0x06))
        ));
    }
}
