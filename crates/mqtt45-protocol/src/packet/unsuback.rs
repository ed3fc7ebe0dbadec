use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::properties::Properties;
use crate::reason_codes::ReasonCode;
use bytes::{Buf, BufMut};

/// UNSUBACK. On v3.1.1 the body is the packet identifier alone; v5 adds
/// properties and one reason code per filter.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
    pub reason_codes: Vec<ReasonCode>,
    pub properties: Properties,
    pub protocol_version: u8,
}

impl UnsubAckPacket {
    pub fn decode_body_with_version<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        protocol_version: u8,
    ) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::IncompletePacket);
        }
        let packet_id = buf.get_u16();

        let (properties, reason_codes) = if protocol_version == 5 {
            let properties = Properties::decode(buf)?;
            let mut reason_codes = Vec::with_capacity(buf.remaining());
            while buf.has_remaining() {
                let byte = buf.get_u8();
                let code = ReasonCode::from_u8(byte).ok_or(MqttError::InvalidReasonCode(byte))?;
                reason_codes.push(code);
            }
            (properties, reason_codes)
        } else {
            (Properties::default(), Vec::new())
        };

        Ok(Self {
            packet_id,
            reason_codes,
            properties,
            protocol_version,
        })
    }
}

impl MqttPacket for UnsubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        if self.protocol_version == 5 {
            self.properties.encode(buf)?;
            for code in &self.reason_codes {
                buf.put_u8((*code).into());
            }
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        Self::decode_body_with_version(buf, fixed_header, 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_v5_round_trip() {
        let packet = UnsubAckPacket {
            packet_id: 5,
            reason_codes: vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted],
            properties: Properties::default(),
            protocol_version: 5,
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded =
            UnsubAckPacket::decode_body_with_version(&mut buf, &fixed_header, 5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_v311_body_is_identifier_only() {
        let packet = UnsubAckPacket {
            packet_id: 6,
            reason_codes: Vec::new(),
            properties: Properties::default(),
            protocol_version: 4,
        };
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[1], 2);
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded =
            UnsubAckPacket::decode_body_with_version(&mut buf, &fixed_header, 4).unwrap();
        assert_eq!(decoded, packet);
    }
}
