use crate::encoding::{decode_string, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::properties::Properties;
use bytes::{Buf, BufMut};

/// UNSUBSCRIBE. Reserved fixed-header flags must equal 0b0010.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
    pub properties: Properties,
    pub protocol_version: u8,
}

impl UnsubscribePacket {
    #[must_use]
    pub fn new(packet_id: u16, protocol_version: u8) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
            properties: Properties::default(),
            protocol_version,
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    pub fn decode_body_with_version<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        protocol_version: u8,
    ) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(MqttError::IncompletePacket);
        }
        let packet_id = buf.get_u16();

        let properties = if protocol_version == 5 {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        let mut filters = Vec::new();
        while buf.has_remaining() {
            filters.push(decode_string(buf)?);
        }

        if filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "UNSUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        Ok(Self {
            packet_id,
            filters,
            properties,
            protocol_version,
        })
    }
}

impl MqttPacket for UnsubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "UNSUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        buf.put_u16(self.packet_id);
        if self.protocol_version == 5 {
            self.properties.encode(buf)?;
        }
        for filter in &self.filters {
            encode_string(buf, filter)?;
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
    fn test_round_trip_both_versions() {
        for version in [4u8, 5] {
            let packet = UnsubscribePacket::new(77, version)
                .add_filter("a/b")
                .add_filter("c/#");
            let mut buf = BytesMut::new();
            packet.encode(&mut buf).unwrap();
            let fixed_header = FixedHeader::decode(&mut buf).unwrap();
            assert_eq!(fixed_header.flags, 0x02);
            let decoded =
                UnsubscribePacket::decode_body_with_version(&mut buf, &fixed_header, version)
                    .unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_empty_filters_rejected() {
        let packet = UnsubscribePacket::new(1, 5);
        let mut buf = BytesMut::new();
        assert!(packet.encode(&mut buf).is_err());
    }
}
