use crate::encoding::{decode_string, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::properties::Properties;
use crate::types::QoS;
use bytes::{Buf, BufMut, Bytes};

/// PUBLISH in either direction. The payload length is implicit: it is
/// whatever remains of the frame after the variable header.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPacket {
    pub topic: String,
    /// Present iff `qos != AtMostOnce`.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub properties: Properties,
    pub protocol_version: u8,
}

impl PublishPacket {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, protocol_version: u8) -> Self {
        Self {
            topic: topic.into(),
            packet_id: None,
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            properties: Properties::default(),
            protocol_version,
        }
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QoS, packet_id: u16) -> Self {
        self.qos = qos;
        self.packet_id = (qos != QoS::AtMostOnce).then_some(packet_id);
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Marks a retransmission. Set when re-sending surviving inflight
    /// publishes after a session resume.
    #[must_use]
    pub fn as_duplicate(mut self) -> Self {
        self.dup = true;
        self
    }

    pub fn decode_body_with_version<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        protocol_version: u8,
    ) -> Result<Self> {
        let flags = fixed_header.flags;
        let retain = flags & 0x01 != 0;
        let qos_bits = (flags >> 1) & 0x03;
        let dup = flags & 0x08 != 0;

        if qos_bits == 3 {
            return Err(MqttError::MalformedPacket(
                "PUBLISH QoS bits must not be 0b11".to_string(),
            ));
        }
        let qos = QoS::from(qos_bits);

        if qos == QoS::AtMostOnce && dup {
            return Err(MqttError::MalformedPacket(
                "PUBLISH dup flag must be 0 for QoS 0".to_string(),
            ));
        }

        let topic = decode_string(buf)?;

        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            if buf.remaining() < 2 {
                return Err(MqttError::IncompletePacket);
            }
            let id = buf.get_u16();
            if id == 0 {
                return Err(MqttError::MalformedPacket(
                    "PUBLISH packet identifier must be non-zero".to_string(),
                ));
            }
            Some(id)
        };

        let properties = if protocol_version == 5 {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(Self {
            topic,
            packet_id,
            payload,
            qos,
            retain,
            dup,
            properties,
            protocol_version,
        })
    }
}

impl MqttPacket for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn flags(&self) -> u8 {
        let mut flags = (self.qos as u8) << 1;
        if self.retain {
            flags |= 0x01;
        }
        if self.dup {
            flags |= 0x08;
        }
        flags
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        encode_string(buf, &self.topic)?;

        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.ok_or_else(|| {
                MqttError::MalformedPacket(
                    "PUBLISH with QoS > 0 requires a packet identifier".to_string(),
                )
            })?;
            buf.put_u16(packet_id);
        }

        if self.protocol_version == 5 {
            self.properties.encode(buf)?;
        }

        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        Self::decode_body_with_version(buf, fixed_header, 5)
    }
}
