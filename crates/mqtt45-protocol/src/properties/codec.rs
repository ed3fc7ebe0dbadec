use super::{Properties, PropertyId, PropertyValue, PropertyValueType};
use crate::encoding::{
    binary_len, decode_binary, decode_string, decode_variable_int, encode_binary, encode_string,
    encode_variable_int, string_len, variable_int_len,
};
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut};

impl Properties {
    /// Encodes the property stream: varint byte-count prefix followed by
    /// identifier/value pairs in insertion order.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let body_len = self.body_len();
        encode_variable_int(
            buf,
            body_len.try_into().map_err(|_| MqttError::PacketTooLarge {
                size: body_len,
                max: u32::MAX as usize,
            })?,
        )?;
        self.encode_body(buf)
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        for (id, value) in &self.entries {
            encode_variable_int(buf, u32::from(*id as u8))?;
            match value {
                PropertyValue::Byte(v) => buf.put_u8(*v),
                PropertyValue::TwoByteInteger(v) => buf.put_u16(*v),
                PropertyValue::FourByteInteger(v) => buf.put_u32(*v),
                PropertyValue::VariableByteInteger(v) => encode_variable_int(buf, *v)?,
                PropertyValue::BinaryData(v) => encode_binary(buf, v)?,
                PropertyValue::Utf8String(v) => encode_string(buf, v)?,
                PropertyValue::Utf8StringPair(k, v) => {
                    encode_string(buf, k)?;
                    encode_string(buf, v)?;
                }
            }
        }
        Ok(())
    }

    /// Decodes a property stream. Unknown identifiers fail with
    /// [`MqttError::UnexpectedTokens`].
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let body_len = decode_variable_int(buf)? as usize;

        if buf.remaining() < body_len {
            return Err(MqttError::IncompletePacket);
        }

        let mut body = buf.copy_to_bytes(body_len);
        let mut properties = Self::new();

        while body.has_remaining() {
            let id_raw = decode_variable_int(&mut body)?;
            let id_byte =
                u8::try_from(id_raw).map_err(|_| unknown_identifier(id_raw))?;
            let id = PropertyId::from_u8(id_byte)
                .ok_or_else(|| unknown_identifier(u32::from(id_byte)))?;

            let value = match id.value_type() {
                PropertyValueType::Byte => {
                    if !body.has_remaining() {
                        return Err(MqttError::IncompletePacket);
                    }
                    PropertyValue::Byte(body.get_u8())
                }
                PropertyValueType::TwoByteInteger => {
                    if body.remaining() < 2 {
                        return Err(MqttError::IncompletePacket);
                    }
                    PropertyValue::TwoByteInteger(body.get_u16())
                }
                PropertyValueType::FourByteInteger => {
                    if body.remaining() < 4 {
                        return Err(MqttError::IncompletePacket);
                    }
                    PropertyValue::FourByteInteger(body.get_u32())
                }
                PropertyValueType::VariableByteInteger => {
                    PropertyValue::VariableByteInteger(decode_variable_int(&mut body)?)
                }
                PropertyValueType::BinaryData => PropertyValue::BinaryData(decode_binary(&mut body)?),
                PropertyValueType::Utf8String => PropertyValue::Utf8String(decode_string(&mut body)?),
                PropertyValueType::Utf8StringPair => {
                    let key = decode_string(&mut body)?;
                    let value = decode_string(&mut body)?;
                    PropertyValue::Utf8StringPair(key, value)
                }
            };

            properties.add(id, value)?;
        }

        Ok(properties)
    }

    /// Full encoded length including the varint prefix.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let body_len = self.body_len();
        variable_int_len(body_len.try_into().unwrap_or(u32::MAX)) + body_len
    }

    fn body_len(&self) -> usize {
        self.entries
            .iter()
            .map(|(id, value)| {
                variable_int_len(u32::from(*id as u8))
                    + match value {
                        PropertyValue::Byte(_) => 1,
                        PropertyValue::TwoByteInteger(_) => 2,
                        PropertyValue::FourByteInteger(_) => 4,
                        PropertyValue::VariableByteInteger(v) => variable_int_len(*v),
                        PropertyValue::BinaryData(v) => binary_len(v),
                        PropertyValue::Utf8String(v) => string_len(v),
                        PropertyValue::Utf8StringPair(k, v) => string_len(k) + string_len(v),
                    }
            })
            .sum()
    }
}

fn unknown_identifier(id: u32) -> MqttError {
    MqttError::UnexpectedTokens(format!("unknown property identifier 0x{id:02X}"))
}
