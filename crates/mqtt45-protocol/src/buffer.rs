use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Contiguous byte log with a read cursor.
///
/// Appends always go to the tail; reads advance the cursor. Every read
/// checks `readable_bytes` first and fails with
/// [`MqttError::IncompletePacket`] without moving the cursor when the
/// buffer holds fewer bytes than requested, which is the framer's signal
/// that more data must arrive before decoding can continue.
#[derive(Debug, Default, Clone)]
pub struct DataBuffer {
    bytes: BytesMut,
    cursor: usize,
}

impl DataBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
            cursor: 0,
        }
    }

    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            bytes: BytesMut::from(data),
            cursor: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes between the cursor and the tail.
    #[must_use]
    pub fn readable_bytes(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Rewinds the cursor to an earlier position, used by the packet
    /// decoder to undo a partial fixed-header read.
    pub fn reset_cursor(&mut self, position: usize) {
        debug_assert!(position <= self.bytes.len());
        self.cursor = position.min(self.bytes.len());
    }

    pub fn append_u8(&mut self, value: u8) {
        self.bytes.put_u8(value);
    }

    /// Appends a big-endian integer of the given byte width (1, 2 or 4).
    pub fn append_integer(&mut self, value: u32, width: usize) -> Result<()> {
        match width {
            1 => self.bytes.put_u8(u8::try_from(value).map_err(|_| {
                MqttError::InvalidParameter(format!("{value} does not fit in one byte"))
            })?),
            2 => self.bytes.put_u16(u16::try_from(value).map_err(|_| {
                MqttError::InvalidParameter(format!("{value} does not fit in two bytes"))
            })?),
            4 => self.bytes.put_u32(value),
            _ => {
                return Err(MqttError::InvalidParameter(format!(
                    "unsupported integer width: {width}"
                )))
            }
        }
        Ok(())
    }

    pub fn append_slice(&mut self, data: &[u8]) {
        self.bytes.put_slice(data);
    }

    /// Appends a UTF-8 string body prefixed by its big-endian 16-bit length.
    pub fn append_string(&mut self, value: &str) -> Result<()> {
        let len =
            u16::try_from(value.len()).map_err(|_| MqttError::StringTooLong(value.len()))?;
        self.bytes.put_u16(len);
        self.bytes.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.readable_bytes() < 1 {
            return Err(MqttError::IncompletePacket);
        }
        let value = self.bytes[self.cursor];
        self.cursor += 1;
        Ok(value)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        if self.readable_bytes() < 2 {
            return Err(MqttError::IncompletePacket);
        }
        let value = u16::from_be_bytes([self.bytes[self.cursor], self.bytes[self.cursor + 1]]);
        self.cursor += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        if self.readable_bytes() < 4 {
            return Err(MqttError::IncompletePacket);
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[self.cursor..self.cursor + 4]);
        self.cursor += 4;
        Ok(u32::from_be_bytes(raw))
    }

    /// Reads exactly `count` bytes as an owned chunk.
    pub fn read_bytes(&mut self, count: usize) -> Result<Bytes> {
        if self.readable_bytes() < count {
            return Err(MqttError::IncompletePacket);
        }
        let chunk = Bytes::copy_from_slice(&self.bytes[self.cursor..self.cursor + count]);
        self.cursor += count;
        Ok(chunk)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.cursor;
        let len = self.read_u16()? as usize;
        if self.readable_bytes() < len {
            self.cursor = start;
            return Err(MqttError::IncompletePacket);
        }
        let body = self.read_bytes(len)?;
        String::from_utf8(body.to_vec()).map_err(|_| {
            MqttError::UnexpectedTokens("string body is not valid UTF-8".to_string())
        })
    }

    /// Splits off the next `count` bytes as a sub-buffer with its own
    /// cursor.
    pub fn read_buffer(&mut self, count: usize) -> Result<DataBuffer> {
        let chunk = self.read_bytes(count)?;
        Ok(DataBuffer::from_slice(&chunk))
    }

    /// Drops everything before the cursor. Called by the framer after a
    /// whole packet was consumed so the log does not grow without bound.
    pub fn compact(&mut self) {
        if self.cursor > 0 {
            self.bytes.advance(self.cursor);
            self.cursor = 0;
        }
    }

    #[must_use]
    pub fn remaining_slice(&self) -> &[u8] {
        &self.bytes[self.cursor..]
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl Buf for DataBuffer {
    fn remaining(&self) -> usize {
        self.readable_bytes()
    }

    fn chunk(&self) -> &[u8] {
        &self.bytes[self.cursor..]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.readable_bytes());
        self.cursor += cnt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_integers() {
        let mut buf = DataBuffer::new();
        buf.append_integer(0x12, 1).unwrap();
        buf.append_integer(0x1234, 2).unwrap();
        buf.append_integer(0x1234_5678, 4).unwrap();

        assert_eq!(buf.read_u8().unwrap(), 0x12);
        assert_eq!(buf.read_u16().unwrap(), 0x1234);
        assert_eq!(buf.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn test_short_read_does_not_advance() {
        let mut buf = DataBuffer::from_slice(&[0x01]);
        assert!(matches!(buf.read_u16(), Err(MqttError::IncompletePacket)));
        assert_eq!(buf.readable_bytes(), 1);
        assert_eq!(buf.read_u8().unwrap(), 0x01);
    }

    #[test]
    fn test_short_string_read_does_not_advance() {
        let mut buf = DataBuffer::new();
        buf.append_integer(10, 2).unwrap();
        buf.append_slice(b"abc");

        assert!(matches!(
            buf.read_string(),
            Err(MqttError::IncompletePacket)
        ));
        // Length prefix must still be readable after the failed attempt.
        assert_eq!(buf.read_u16().unwrap(), 10);
    }

    #[test]
    fn test_string_round_trip() {
        let mut buf = DataBuffer::new();
        buf.append_string("sensors/kitchen").unwrap();
        assert_eq!(buf.read_string().unwrap(), "sensors/kitchen");
    }

    #[test]
    fn test_invalid_utf8_string() {
        let mut buf = DataBuffer::new();
        buf.append_integer(2, 2).unwrap();
        buf.append_slice(&[0xFF, 0xFE]);
        assert!(matches!(
            buf.read_string(),
            Err(MqttError::UnexpectedTokens(_))
        ));
    }

    #[test]
    fn test_sub_buffer() {
        let mut buf = DataBuffer::from_slice(&[1, 2, 3, 4, 5]);
        let mut sub = buf.read_buffer(3).unwrap();
        assert_eq!(sub.readable_bytes(), 3);
        assert_eq!(sub.read_u8().unwrap(), 1);
        assert_eq!(buf.read_u8().unwrap(), 4);
    }

    #[test]
    fn test_compact() {
        let mut buf = DataBuffer::from_slice(&[1, 2, 3, 4]);
        buf.read_u16().unwrap();
        buf.compact();
        assert_eq!(buf.cursor(), 0);
        assert_eq!(buf.as_slice(), &[3, 4]);
    }

    #[test]
    fn test_buf_impl() {
        let mut buf = DataBuffer::from_slice(&[0x00, 0x2A]);
        assert_eq!(Buf::remaining(&buf), 2);
        assert_eq!(buf.get_u16(), 42);
        assert_eq!(Buf::remaining(&buf), 0);
    }
}
