use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::properties::Properties;
use crate::reason_codes::ReasonCode;
use bytes::{Buf, BufMut};

/// DISCONNECT. The v3.1.1 form has no body at all; the v5 form may omit
/// the reason code and properties when the reason is normal disconnection
/// and no properties are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectPacket {
    pub reason_code: ReasonCode,
    pub properties: Properties,
    pub protocol_version: u8,
}

impl DisconnectPacket {
    #[must_use]
    pub fn new(reason_code: ReasonCode, protocol_version: u8) -> Self {
        Self {
            reason_code,
            properties: Properties::default(),
            protocol_version,
        }
    }

    pub fn decode_body_with_version<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        protocol_version: u8,
    ) -> Result<Self> {
        if protocol_version != 5 {
            if fixed_header.remaining_length != 0 {
                return Err(MqttError::MalformedPacket(
                    "v3.1.1 DISCONNECT must have an empty body".to_string(),
                ));
            }
            return Ok(Self::new(ReasonCode::Success, protocol_version));
        }

        let reason_code = if fixed_header.remaining_length >= 1 {
            let byte = buf.get_u8();
            ReasonCode::from_u8(byte).ok_or(MqttError::InvalidReasonCode(byte))?
        } else {
            ReasonCode::Success
        };

        let properties = if fixed_header.remaining_length > 1 {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        Ok(Self {
            reason_code,
            properties,
            protocol_version,
        })
    }
}

impl MqttPacket for DisconnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Disconnect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.protocol_version != 5 {
            return Ok(());
        }
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            buf.put_u8(self.reason_code.into());
            if !self.properties.is_empty() {
                self.properties.encode(buf)?;
            }
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        Self::decode_body_with_version(buf, fixed_header, 5)
    }
}
