//! Bit-level streams backing the column codec.

use bytes::{BufMut, BytesMut};
use std::io;

/// Appends bits most-significant first.
#[derive(Default)]
pub struct BitWriter {
    stream: BytesMut,
    free: u8, // unused low bits in the last byte
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stream: BytesMut::with_capacity(capacity),
            free: 0,
        }
    }

    /// Writes a single bit.
    pub fn write_bit(&mut self, bit: bool) {
        if self.free == 0 {
            self.stream.put_u8(0);
            self.free = 8;
        }

        self.free -= 1;
        if bit {
            let last = self.stream.len() - 1;
            self.stream[last] |= 1 << self.free;
        }
    }

    /// Writes a whole byte, straddling the current byte boundary if needed.
    pub fn write_byte(&mut self, byte: u8) {
        if self.free == 0 {
            self.stream.put_u8(byte);
            return;
        }

        let last = self.stream.len() - 1;
        self.stream[last] |= byte >> (8 - self.free);
        self.stream.put_u8(byte << self.free);
    }

    /// Writes the low `nbits` bits of `value`.
    pub fn write_bits(&mut self, value: u64, nbits: u8) {
        debug_assert!(nbits <= 64);
        if nbits == 0 {
            return;
        }

        let mut value = value << (64 - nbits as u32);
        let mut remaining = nbits;

        while remaining >= 8 {
            self.write_byte((value >> 56) as u8);
            value <<= 8;
            remaining -= 8;
        }
        while remaining > 0 {
            self.write_bit(value >> 63 == 1);
            value <<= 1;
            remaining -= 1;
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.stream.to_vec()
    }
}

/// Reads bits most-significant first from a borrowed slice.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize, // in bits
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn eof() -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, "bit stream exhausted")
    }

    /// Reads a single bit.
    pub fn read_bit(&mut self) -> io::Result<bool> {
        let byte = *self.data.get(self.pos / 8).ok_or_else(Self::eof)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    /// Reads `nbits` bits into the low end of a u64.
    pub fn read_bits(&mut self, nbits: u8) -> io::Result<u64> {
        if nbits > 64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "nbits must be <= 64",
            ));
        }
        if self.remaining() < nbits as usize {
            return Err(Self::eof());
        }

        let mut value = 0u64;
        let mut remaining = nbits;

        // Byte-aligned fast path
        while remaining >= 8 && self.pos % 8 == 0 {
            value = (value << 8) | self.data[self.pos / 8] as u64;
            self.pos += 8;
            remaining -= 8;
        }
        while remaining > 0 {
            value = (value << 1) | self.read_bit()? as u64;
            remaining -= 1;
        }

        Ok(value)
    }

    /// Bits left to read.
    pub fn remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_and_bytes_interleave() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_bit(false);
        writer.write_bit(true);
        writer.write_bits(0b1010, 4);
        writer.write_byte(0xFF);
        writer.write_bits(u64::MAX, 64);

        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);

        assert!(reader.read_bit().unwrap());
        assert!(!reader.read_bit().unwrap());
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_bits(4).unwrap(), 0b1010);
        assert_eq!(reader.read_bits(8).unwrap(), 0xFF);
        assert_eq!(reader.read_bits(64).unwrap(), u64::MAX);
    }

    #[test]
    fn test_reading_past_end_fails() {
        let bytes = [0xAAu8];
        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(0).unwrap(), 0);
        assert!(reader.read_bits(65).is_err());
        assert_eq!(reader.read_bits(8).unwrap(), 0xAA);
        assert!(reader.read_bit().is_err());
    }
}
