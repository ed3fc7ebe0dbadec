use crate::encoding::{decode_binary, decode_string, encode_binary, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::properties::Properties;
use crate::types::{QoS, WillMessage};
use bytes::{Buf, BufMut};

const PROTOCOL_NAME: &str = "MQTT";

/// CONNECT. The payload field order is mandated by the protocol: client
/// identifier, will properties (v5), will topic, will payload, username,
/// password, each present iff its flag bit is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectPacket {
    pub protocol_version: u8,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<WillMessage>,
    pub will_properties: Properties,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub properties: Properties,
}

impl ConnectPacket {
    #[must_use]
    pub fn new(client_id: impl Into<String>, protocol_version: u8) -> Self {
        Self {
            protocol_version,
            clean_start: true,
            keep_alive: 60,
            client_id: client_id.into(),
            will: None,
            will_properties: Properties::default(),
            username: None,
            password: None,
            properties: Properties::default(),
        }
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_start {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        flags
    }
}

impl MqttPacket for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        encode_string(buf, PROTOCOL_NAME)?;
        buf.put_u8(self.protocol_version);
        buf.put_u8(self.connect_flags());
        buf.put_u16(self.keep_alive);

        if self.protocol_version == 5 {
            self.properties.encode(buf)?;
        }

        encode_string(buf, &self.client_id)?;

        if let Some(will) = &self.will {
            if self.protocol_version == 5 {
                self.will_properties.encode(buf)?;
            }
            encode_string(buf, &will.topic)?;
            encode_binary(buf, &will.payload)?;
        }

        if let Some(username) = &self.username {
            encode_string(buf, username)?;
        }
        if let Some(password) = &self.password {
            encode_binary(buf, password)?;
        }

        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        let protocol_name = decode_string(buf)?;
        if protocol_name != PROTOCOL_NAME {
            return Err(MqttError::MalformedPacket(format!(
                "unexpected protocol name: {protocol_name}"
            )));
        }

        if buf.remaining() < 4 {
            return Err(MqttError::IncompletePacket);
        }
        let protocol_version = buf.get_u8();
        if protocol_version != 4 && protocol_version != 5 {
            return Err(MqttError::UnsupportedProtocolVersion);
        }

        let flags = buf.get_u8();
        if flags & 0x01 != 0 {
            return Err(MqttError::MalformedPacket(
                "CONNECT reserved flag bit must be 0".to_string(),
            ));
        }
        let clean_start = flags & 0x02 != 0;
        let has_will = flags & 0x04 != 0;
        let will_qos = QoS::from((flags >> 3) & 0x03);
        let will_retain = flags & 0x20 != 0;
        let has_password = flags & 0x40 != 0;
        let has_username = flags & 0x80 != 0;

        if !has_will && ((flags >> 3) & 0x03 != 0 || will_retain) {
            return Err(MqttError::MalformedPacket(
                "CONNECT will QoS/retain set without will flag".to_string(),
            ));
        }

        let keep_alive = buf.get_u16();

        let properties = if protocol_version == 5 {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        let client_id = decode_string(buf)?;

        let (will, will_properties) = if has_will {
            let will_properties = if protocol_version == 5 {
                Properties::decode(buf)?
            } else {
                Properties::default()
            };
            let topic = decode_string(buf)?;
            let payload = decode_binary(buf)?;
            (
                Some(WillMessage {
                    topic,
                    payload: payload.to_vec(),
                    qos: will_qos,
                    retain: will_retain,
                }),
                will_properties,
            )
        } else {
            (None, Properties::default())
        };

        let username = if has_username {
            Some(decode_string(buf)?)
        } else {
            None
        };
        let password = if has_password {
            Some(decode_binary(buf)?.to_vec())
        } else {
            None
        };

        Ok(Self {
            protocol_version,
            clean_start,
            keep_alive,
            client_id,
            will,
            will_properties,
            username,
            password,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn round_trip(packet: &ConnectPacket) -> ConnectPacket {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        ConnectPacket::decode_body(&mut buf, &fixed_header).unwrap()
    }

    #[test]
    fn test_minimal_v5_round_trip() {
        let packet = ConnectPacket::new("thermostat-3", 5);
        assert_eq!(round_trip(&packet), packet);
    }

    #[test]
    fn test_minimal_v311_round_trip() {
        let packet = ConnectPacket::new("thermostat-3", 4);
        let decoded = round_trip(&packet);
        assert_eq!(decoded, packet);
        assert_eq!(decoded.protocol_version, 4);
    }

    #[test]
    fn test_full_payload_order_round_trip() {
        let mut packet = ConnectPacket::new("c1", 5);
        packet.clean_start = false;
        packet.keep_alive = 30;
        packet.will = Some(
            WillMessage::new("status/c1", b"offline".to_vec())
                .with_qos(QoS::AtLeastOnce)
                .with_retain(true),
        );
        packet.will_properties.set_reason_string("bye");
        packet.username = Some("user".to_string());
        packet.password = Some(b"secret".to_vec());
        packet.properties.set_session_expiry_interval(120);

        let decoded = round_trip(&packet);
        assert_eq!(decoded, packet);
        let will = decoded.will.unwrap();
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
    }

    #[test]
    fn test_connect_flags() {
        let mut packet = ConnectPacket::new("c", 5);
        packet.will = Some(WillMessage::new("w", Vec::new()).with_qos(QoS::ExactlyOnce));
        packet.username = Some("u".into());
        packet.password = Some(vec![1]);
        // clean(0x02) | will(0x04) | willQoS2(0x10) | password(0x40) | username(0x80)
        assert_eq!(packet.connect_flags(), 0xD6);
    }

    #[test]
    fn test_reserved_flag_bit_rejected() {
        let mut buf = BytesMut::new();
        encode_string(&mut buf, "MQTT").unwrap();
        buf.put_u8(5);
        buf.put_u8(0x01); // reserved bit set
        buf.put_u16(60);
        let fixed_header = FixedHeader::new(PacketType::Connect, 0, buf.len() as u32);
        assert!(ConnectPacket::decode_body(&mut buf, &fixed_header).is_err());
    }

    #[test]
    fn test_unknown_protocol_name_rejected() {
        let mut buf = BytesMut::new();
        encode_string(&mut buf, "MQIsdp").unwrap();
        buf.put_u8(3);
        let fixed_header = FixedHeader::new(PacketType::Connect, 0, buf.len() as u32);
        assert!(ConnectPacket::decode_body(&mut buf, &fixed_header).is_err());
    }
}
