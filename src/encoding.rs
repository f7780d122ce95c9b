//! Gorilla compression for `(timestamp, value)` streams.
//!
//! Timestamps are stored as delta-of-delta, values as XOR against the
//! previous value. Partition files use one stream for the time index and one
//! per numeric column.

use crate::bstream::{BitReader, BitWriter};
use crate::{DfCacheError, Result};

/// One encoded `(timestamp, value)` pair. Timestamps are UTC nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Encoder for sample streams using Gorilla compression.
pub struct GorillaEncoder {
    buf: BitWriter,
    count: usize,

    // Timestamp tracking
    t: i64,
    t_delta: i64,

    // Value tracking
    v: f64,
    leading: u8,
    trailing: u8,
}

impl Default for GorillaEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GorillaEncoder {
    pub fn new() -> Self {
        Self {
            buf: BitWriter::with_capacity(4096),
            count: 0,
            t: 0,
            t_delta: 0,
            v: 0.0,
            leading: 0,
            trailing: 0,
        }
    }

    /// Encodes a sample.
    pub fn encode(&mut self, sample: Sample) {
        match self.count {
            0 => {
                write_varint(&mut self.buf, sample.timestamp);
                self.buf.write_bits(sample.value.to_bits(), 64);
            }
            1 => {
                let t_delta = sample.timestamp.wrapping_sub(self.t);
                write_varint(&mut self.buf, t_delta);
                self.write_value_delta(sample.value);
                self.t_delta = t_delta;
            }
            _ => {
                let t_delta = sample.timestamp.wrapping_sub(self.t);
                let delta_of_delta = t_delta.wrapping_sub(self.t_delta);

                match delta_of_delta {
                    0 => self.buf.write_bit(false),
                    -63..=64 => {
                        self.buf.write_bits(0b10, 2);
                        self.buf.write_bits(delta_of_delta as u64, 7);
                    }
                    -255..=256 => {
                        self.buf.write_bits(0b110, 3);
                        self.buf.write_bits(delta_of_delta as u64, 9);
                    }
                    -2047..=2048 => {
                        self.buf.write_bits(0b1110, 4);
                        self.buf.write_bits(delta_of_delta as u64, 12);
                    }
                    _ => {
                        self.buf.write_bits(0b1111, 4);
                        self.buf.write_bits(delta_of_delta as u64, 64);
                    }
                }

                self.write_value_delta(sample.value);
                self.t_delta = t_delta;
            }
        }

        self.t = sample.timestamp;
        self.v = sample.value;
        self.count += 1;
    }

    fn write_value_delta(&mut self, value: f64) {
        let v_delta = value.to_bits() ^ self.v.to_bits();

        if v_delta == 0 {
            self.buf.write_bit(false);
            return;
        }
        self.buf.write_bit(true);

        // 5 bits are available for the leading count
        let leading = (v_delta.leading_zeros() as u8).min(31);
        let trailing = v_delta.trailing_zeros() as u8;

        if self.count > 1 && leading >= self.leading && trailing >= self.trailing {
            self.buf.write_bit(false);
            let significant = 64 - self.leading - self.trailing;
            self.buf.write_bits(v_delta >> self.trailing, significant);
        } else {
            self.leading = leading;
            self.trailing = trailing;

            self.buf.write_bit(true);
            self.buf.write_bits(leading as u64, 5);

            // 64 significant bits are written as 0
            let significant = 64 - leading - trailing;
            self.buf.write_bits((significant % 64) as u64, 6);
            self.buf.write_bits(v_delta >> trailing, significant);
        }
    }

    /// Number of samples encoded.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf.into_bytes()
    }
}

/// Decoder for Gorilla-compressed sample streams.
pub struct GorillaDecoder<'a> {
    reader: BitReader<'a>,
    count: usize,

    t: i64,
    t_delta: i64,

    v: f64,
    leading: u8,
    trailing: u8,
}

impl<'a> GorillaDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: BitReader::new(data),
            count: 0,
            t: 0,
            t_delta: 0,
            v: 0.0,
            leading: 0,
            trailing: 0,
        }
    }

    /// Decodes the next sample.
    pub fn decode(&mut self) -> Result<Sample> {
        match self.count {
            0 => {
                self.t = read_varint(&mut self.reader)?;
                self.v = f64::from_bits(self.reader.read_bits(64)?);
            }
            1 => {
                self.t_delta = read_varint(&mut self.reader)?;
                self.t = self.t.wrapping_add(self.t_delta);
                self.read_value()?;
            }
            _ => {
                let mut delimiter = 0u8;
                for _ in 0..4 {
                    delimiter <<= 1;
                    if !self.reader.read_bit()? {
                        break;
                    }
                    delimiter |= 1;
                }

                let delta_of_delta = match delimiter {
                    0x00 => 0,
                    0x02 => self.read_signed(7)?,
                    0x06 => self.read_signed(9)?,
                    0x0e => self.read_signed(12)?,
                    0x0f => self.reader.read_bits(64)? as i64,
                    other => {
                        return Err(DfCacheError::DataCorruption(format!(
                            "unknown timestamp delimiter {other:#x}"
                        )));
                    }
                };

                self.t_delta = self.t_delta.wrapping_add(delta_of_delta);
                self.t = self.t.wrapping_add(self.t_delta);
                self.read_value()?;
            }
        }

        self.count += 1;
        Ok(Sample::new(self.t, self.v))
    }

    /// Decodes exactly `n` samples.
    ///
    /// Every sample occupies at least one bit, so a count larger than the
    /// stream's bit length is rejected before anything is allocated.
    pub fn decode_all(mut self, n: usize) -> Result<Vec<Sample>> {
        if n > self.reader.remaining() {
            return Err(DfCacheError::DataCorruption(format!(
                "{n} samples cannot fit in {} bits",
                self.reader.remaining()
            )));
        }
        let mut samples = Vec::with_capacity(n);
        for _ in 0..n {
            samples.push(self.decode()?);
        }
        Ok(samples)
    }

    fn read_signed(&mut self, nbits: u8) -> Result<i64> {
        let bits = self.reader.read_bits(nbits)?;
        if bits > (1 << (nbits - 1)) {
            Ok(bits as i64 - (1 << nbits))
        } else {
            Ok(bits as i64)
        }
    }

    fn read_value(&mut self) -> Result<()> {
        if !self.reader.read_bit()? {
            return Ok(());
        }

        if self.reader.read_bit()? {
            self.leading = self.reader.read_bits(5)? as u8;
            let significant = match self.reader.read_bits(6)? as u8 {
                0 => 64,
                n => n,
            };
            if self.leading + significant > 64 {
                return Err(DfCacheError::DataCorruption(format!(
                    "invalid value header: {} leading, {} significant bits",
                    self.leading, significant
                )));
            }
            self.trailing = 64 - self.leading - significant;
        }

        let significant = 64 - self.leading - self.trailing;
        let bits = self.reader.read_bits(significant)?;
        self.v = f64::from_bits(self.v.to_bits() ^ (bits << self.trailing));

        Ok(())
    }
}

fn write_varint(buf: &mut BitWriter, value: i64) {
    // Zigzag encode
    let mut value = ((value << 1) ^ (value >> 63)) as u64;
    while value >= 0x80 {
        buf.write_byte((value as u8) | 0x80);
        value >>= 7;
    }
    buf.write_byte(value as u8);
}

fn read_varint(reader: &mut BitReader<'_>) -> Result<i64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_bits(8)? as u8;
        if shift >= 64 {
            return Err(DfCacheError::DataCorruption(
                "varint exceeds 64 bits".to_string(),
            ));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    Ok(((result >> 1) as i64) ^ -((result & 1) as i64))
}
