//! Bounds-checked payload cursor.
//!
//! Every multi-byte read checks the remaining length first; nothing ever
//! reads past the payload. A failed read records how many bytes were
//! missing so decoders can report the exact deficit of a truncated packet.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::lenenc::{self, Lenenc};

/// A reader over one packet payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Bytes the last failed read was short by.
    shortfall: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a new reader from a payload slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            shortfall: 0,
        }
    }

    /// Get remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if we've reached the end of the data.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// How many bytes the last failed read was short by.
    pub fn shortfall(&self) -> usize {
        self.shortfall
    }

    fn fail<T>(&mut self, needed: usize) -> Option<T> {
        self.shortfall = needed - self.remaining();
        None
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return self.fail(1);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Some(byte)
    }

    /// Read a u16 (little-endian).
    pub fn read_u16_le(&mut self) -> Option<u16> {
        if self.remaining() < 2 {
            return self.fail(2);
        }
        let value = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Some(value)
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24_le(&mut self) -> Option<u32> {
        if self.remaining() < 3 {
            return self.fail(3);
        }
        let value = u32::from(self.data[self.pos])
            | (u32::from(self.data[self.pos + 1]) << 8)
            | (u32::from(self.data[self.pos + 2]) << 16);
        self.pos += 3;
        Some(value)
    }

    /// Read a u32 (little-endian).
    pub fn read_u32_le(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return self.fail(4);
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Some(u32::from_le_bytes(buf))
    }

    /// Read a u64 (little-endian).
    pub fn read_u64_le(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return self.fail(8);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Some(u64::from_le_bytes(buf))
    }

    /// Read a length-encoded integer, NULL sentinel included.
    pub fn read_lenenc(&mut self) -> Option<Lenenc> {
        match lenenc::decode(&self.data[self.pos.min(self.data.len())..]) {
            Some((value, consumed)) => {
                self.pos += consumed;
                Some(value)
            }
            None => {
                let needed = match self.peek() {
                    Some(0xFC) => 3,
                    Some(0xFD) => 4,
                    Some(0xFE | 0xFF) => 9,
                    _ => 1,
                };
                self.fail(needed)
            }
        }
    }

    /// Read a length-encoded integer, treating the NULL sentinel as an
    /// absent value.
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        self.read_lenenc()?.as_int()
    }

    /// Read a length-encoded string.
    pub fn read_lenenc_string(&mut self) -> Option<String> {
        let len = self.read_lenenc_int()? as usize;
        self.read_string(len)
    }

    /// Read a length-encoded byte slice.
    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.read_lenenc_int()? as usize;
        self.read_bytes(len)
    }

    /// Read a null-terminated string.
    ///
    /// A missing terminator consumes the rest of the payload, matching the
    /// server's habit of dropping the final NUL in some packets.
    pub fn read_null_string(&mut self) -> Option<String> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        // Skip the null terminator
        if self.pos < self.data.len() {
            self.pos += 1;
        }
        Some(s)
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize) -> Option<String> {
        let bytes = self.read_bytes(len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read remaining data as a string.
    pub fn read_rest_string(&mut self) -> String {
        let s = String::from_utf8_lossy(&self.data[self.pos..]).into_owned();
        self.pos = self.data.len();
        s
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return self.fail(len);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(bytes)
    }

    /// Read remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Skip a number of bytes.
    pub fn skip(&mut self, n: usize) -> Option<()> {
        if self.remaining() < n {
            return self.fail(n);
        }
        self.pos += n;
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_u8() {
        let mut reader = PacketReader::new(&[0x42, 0x43]);
        assert_eq!(reader.read_u8(), Some(0x42));
        assert_eq!(reader.read_u8(), Some(0x43));
        assert_eq!(reader.read_u8(), None);
        assert_eq!(reader.shortfall(), 1);
    }

    #[test]
    fn fixed_width_reads() {
        let mut reader = PacketReader::new(&[0x34, 0x12]);
        assert_eq!(reader.read_u16_le(), Some(0x1234));

        let mut reader = PacketReader::new(&[0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u24_le(), Some(0x0012_3456));

        let mut reader = PacketReader::new(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u32_le(), Some(0x1234_5678));

        let mut reader = PacketReader::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_u64_le(), Some(0x0807_0605_0403_0201));
    }

    #[test]
    fn shortfall_is_exact() {
        let mut reader = PacketReader::new(&[0x01, 0x02]);
        assert_eq!(reader.read_u64_le(), None);
        assert_eq!(reader.shortfall(), 6);

        let mut reader = PacketReader::new(&[0xFE, 0x01]);
        assert_eq!(reader.read_lenenc(), None);
        assert_eq!(reader.shortfall(), 7);
    }

    #[test]
    fn lenenc_reads() {
        let mut reader = PacketReader::new(&[0x42]);
        assert_eq!(reader.read_lenenc(), Some(Lenenc::Int(0x42)));

        let mut reader = PacketReader::new(&[0xFC, 0x34, 0x12]);
        assert_eq!(reader.read_lenenc_int(), Some(0x1234));

        let mut reader = PacketReader::new(&[0xFB]);
        assert_eq!(reader.read_lenenc(), Some(Lenenc::Null));

        let mut reader = PacketReader::new(&[0xFB]);
        assert_eq!(reader.read_lenenc_int(), None);
    }

    #[test]
    fn null_terminated_strings() {
        let mut reader = PacketReader::new(b"hello\0world\0");
        assert_eq!(reader.read_null_string(), Some("hello".to_string()));
        assert_eq!(reader.read_null_string(), Some("world".to_string()));
    }

    #[test]
    fn unterminated_string_consumes_rest() {
        let mut reader = PacketReader::new(b"tail");
        assert_eq!(reader.read_null_string(), Some("tail".to_string()));
        assert!(reader.is_empty());
    }

    #[test]
    fn lenenc_string() {
        let mut reader = PacketReader::new(&[0x05, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(reader.read_lenenc_string(), Some("hello".to_string()));
    }

    #[test]
    fn skip_and_rest() {
        let mut reader = PacketReader::new(&[1, 2, 3, 4]);
        assert_eq!(reader.skip(2), Some(()));
        assert_eq!(reader.read_rest(), &[3, 4]);
        assert!(reader.is_empty());
        assert_eq!(reader.skip(1), None);
    }
}
