use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::properties::Properties;
use crate::reason_codes::ReasonCode;
use bytes::{Buf, BufMut, Bytes};

/// v5 enhanced-authentication exchange packet. Like DISCONNECT, the body
/// may be omitted entirely when the reason is success with no properties.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthPacket {
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl AuthPacket {
    #[must_use]
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::default(),
        }
    }

    /// Builds the client's next round of a multi-step handshake.
    pub fn continue_authentication(
        method: impl Into<String>,
        data: Option<Bytes>,
    ) -> Result<Self> {
        let mut packet = Self::new(ReasonCode::ContinueAuthentication);
        packet.properties.set_authentication_method(method);
        if let Some(data) = data {
            packet.properties.set_authentication_data(data);
        }
        Ok(packet)
    }

    /// Initiates re-authentication on an open connection.
    pub fn re_authenticate(method: impl Into<String>, data: Option<Bytes>) -> Result<Self> {
        let mut packet = Self::new(ReasonCode::ReAuthenticate);
        packet.properties.set_authentication_method(method);
        if let Some(data) = data {
            packet.properties.set_authentication_data(data);
        }
        Ok(packet)
    }

    #[must_use]
    pub fn authentication_method(&self) -> Option<String> {
        self.properties.authentication_method()
    }

    #[must_use]
    pub fn authentication_data(&self) -> Option<Bytes> {
        self.properties.authentication_data()
    }
}

impl MqttPacket for AuthPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Auth
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            buf.put_u8(self.reason_code.into());
            if !self.properties.is_empty() {
                self.properties.encode(buf)?;
            }
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.remaining_length == 0 {
            return Ok(Self::new(ReasonCode::Success));
        }

        let byte = buf.get_u8();
        let reason_code = ReasonCode::from_u8(byte).ok_or(MqttError::InvalidReasonCode(byte))?;

        if !matches!(
            reason_code,
            ReasonCode::Success | ReasonCode::ContinueAuthentication | ReasonCode::ReAuthenticate
        ) {
            return Err(MqttError::MalformedPacket(format!(
                "invalid AUTH reason code: {reason_code:?}"
            )));
        }

        let properties = if fixed_header.remaining_length > 1 {
            Properties::decode(buf)?
        } else {
            Properties::default()
        };

        Ok(Self {
            reason_code,
            properties,
        })
    }
}
