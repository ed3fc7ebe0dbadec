//! Variable-byte-integer, string and binary codecs shared by every packet
//! encoder.

use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, Bytes};

/// Largest value a 4-byte variable byte integer can carry.
pub const MAX_VARIABLE_INT: u32 = 268_435_455;

/// Encodes an MQTT variable byte integer (1 to 4 bytes, 7 payload bits per
/// byte plus a continuation bit).
pub fn encode_variable_int<B: BufMut>(buf: &mut B, mut value: u32) -> Result<()> {
    if value > MAX_VARIABLE_INT {
        return Err(MqttError::MalformedPacket(format!(
            "value {value} exceeds maximum variable byte integer"
        )));
    }

    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Decodes a variable byte integer. A continuation bit on the fourth byte
/// fails with [`MqttError::VarintOverflow`]; running out of input fails
/// with [`MqttError::IncompletePacket`].
pub fn decode_variable_int<B: Buf>(buf: &mut B) -> Result<u32> {
    let mut value: u32 = 0;
    let mut multiplier: u32 = 1;

    for i in 0..4 {
        if !buf.has_remaining() {
            return Err(MqttError::IncompletePacket);
        }
        let byte = buf.get_u8();
        value += u32::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        if i == 3 {
            break;
        }
        multiplier *= 128;
    }

    Err(MqttError::VarintOverflow)
}

/// Encoded byte count of `value` as a variable byte integer, used for
/// remaining-length and property-length prefixes.
#[must_use]
pub fn variable_int_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Encodes a UTF-8 string body prefixed by a big-endian 16-bit length.
pub fn encode_string<B: BufMut>(buf: &mut B, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| MqttError::StringTooLong(value.len()))?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

pub fn decode_string<B: Buf>(buf: &mut B) -> Result<String> {
    let data = decode_binary(buf)?;
    String::from_utf8(data.to_vec())
        .map_err(|_| MqttError::UnexpectedTokens("string body is not valid UTF-8".to_string()))
}

/// Binary data uses the same 16-bit length framing as strings.
pub fn encode_binary<B: BufMut>(buf: &mut B, value: &[u8]) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| MqttError::StringTooLong(value.len()))?;
    buf.put_u16(len);
    buf.put_slice(value);
    Ok(())
}

pub fn decode_binary<B: Buf>(buf: &mut B) -> Result<Bytes> {
    if buf.remaining() < 2 {
        return Err(MqttError::IncompletePacket);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(MqttError::IncompletePacket);
    }
    Ok(buf.copy_to_bytes(len))
}

#[must_use]
pub fn string_len(value: &str) -> usize {
    2 + value.len()
}

#[must_use]
pub fn binary_len(value: &[u8]) -> usize {
    2 + value.len()
}
