use crate::encoding::{decode_string, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::properties::Properties;
use crate::types::QoS;
use bytes::{Buf, BufMut};

/// v5 retain-handling option carried in the subscription options byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetainHandling {
    #[default]
    SendAtSubscribe = 0,
    SendAtSubscribeIfNew = 1,
    DoNotSend = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionOptions {
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl SubscriptionOptions {
    #[must_use]
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn encode(self) -> u8 {
        let mut byte = self.qos as u8;
        if self.no_local {
            byte |= 0x04;
        }
        if self.retain_as_published {
            byte |= 0x08;
        }
        byte |= (self.retain_handling as u8) << 4;
        byte
    }

    pub fn decode(byte: u8) -> Result<Self> {
        if byte & 0xC0 != 0 {
            return Err(MqttError::MalformedPacket(
                "subscription options bits 6-7 must be 0".to_string(),
            ));
        }
        let qos_bits = byte & 0x03;
        if qos_bits == 3 {
            return Err(MqttError::MalformedPacket(
                "subscription QoS must not be 3".to_string(),
            ));
        }
        let retain_handling = match (byte >> 4) & 0x03 {
            0 => RetainHandling::SendAtSubscribe,
            1 => RetainHandling::SendAtSubscribeIfNew,
            2 => RetainHandling::DoNotSend,
            _ => {
                return Err(MqttError::MalformedPacket(
                    "retain handling 3 is reserved".to_string(),
                ))
            }
        };
        Ok(Self {
            qos: QoS::from(qos_bits),
            no_local: byte & 0x04 != 0,
            retain_as_published: byte & 0x08 != 0,
            retain_handling,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub filter: String,
    pub options: SubscriptionOptions,
}

/// SUBSCRIBE. Reserved fixed-header flags must equal 0b0010.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<TopicFilter>,
    pub properties: Properties,
    pub protocol_version: u8,
}

impl SubscribePacket {
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
    pub fn add_filter(mut self, filter: impl Into<String>, qos: QoS) -> Self {
        self.filters.push(TopicFilter {
            filter: filter.into(),
            options: SubscriptionOptions::new(qos),
        });
        self
    }

    #[must_use]
    pub fn add_filter_with_options(mut self, filter: impl Into<String>, options: SubscriptionOptions) -> Self {
        self.filters.push(TopicFilter {
            filter: filter.into(),
            options,
        });
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

        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "SUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        let mut filters = Vec::new();
        while buf.has_remaining() {
            let filter = decode_string(buf)?;
            if !buf.has_remaining() {
                return Err(MqttError::IncompletePacket);
            }
            let options_byte = buf.get_u8();
            let options = if protocol_version == 5 {
                SubscriptionOptions::decode(options_byte)?
            } else {
                SubscriptionOptions::new(QoS::from(options_byte & 0x03))
            };
            filters.push(TopicFilter { filter, options });
        }

        Ok(Self {
            packet_id,
            filters,
            properties,
            protocol_version,
        })
    }
}

impl MqttPacket for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "SUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        buf.put_u16(self.packet_id);

        if self.protocol_version == 5 {
            self.properties.encode(buf)?;
        }

        for filter in &self.filters {
            encode_string(buf, &filter.filter)?;
            if self.protocol_version == 5 {
                buf.put_u8(filter.options.encode());
            } else {
                buf.put_u8(filter.options.qos as u8);
            }
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        Self::decode_body_with_version(buf, fixed_header, 5)
    }
}
