//! Bounds-checked payload reading and scaled-value helpers

use bytes::BufMut;

use crate::core::{Error, Result};

/// Little-endian cursor over one message payload.
///
/// Every read checks the remaining length and reports a
/// [`Error::DecodeLengthMismatch`] tagged with the message code instead of
/// panicking, so a short payload only fails its own message.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    code: u16,
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Creates a reader for the payload of `code`
    pub fn new(code: u16, data: &'a [u8]) -> Self {
        PayloadReader { code, data, pos: 0 }
    }

    /// Message code the payload belongs to
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Total payload length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for an empty payload
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::DecodeLengthMismatch {
                code: self.code,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    /// Reads `n` raw bytes
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Reads everything left
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Discards `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Reads a fixed-width ASCII block
    pub fn fixed_str(&mut self, n: usize) -> Result<String> {
        Ok(ascii(self.take(n)?))
    }

    /// Reads a string prefixed by its one-byte length
    pub fn len_prefixed_str(&mut self) -> Result<String> {
        let n = self.u8()? as usize;
        self.fixed_str(n)
    }

    /// Number of whole `record_size` records left in the payload
    pub fn records(&self, record_size: usize) -> usize {
        if record_size == 0 {
            0
        } else {
            self.remaining() / record_size
        }
    }
}

fn ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Writes a string as raw bytes, truncated to `max` bytes
pub fn put_str(dst: &mut impl BufMut, value: &str, max: usize) {
    let bytes = value.as_bytes();
    dst.put_slice(&bytes[..bytes.len().min(max)]);
}

/// Writes a string prefixed by its one-byte length
pub fn put_len_prefixed_str(dst: &mut impl BufMut, value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(u8::MAX as usize);
    dst.put_u8(n as u8);
    dst.put_slice(&bytes[..n]);
}

/// Converts an engineering value to its fixed-point wire unit, saturating to `u8`
pub fn scaled_u8(value: f64, scale: f64) -> u8 {
    (value * scale).round().clamp(0.0, u8::MAX as f64) as u8
}

/// Converts an engineering value to its fixed-point wire unit, saturating to `u16`
pub fn scaled_u16(value: f64, scale: f64) -> u16 {
    (value * scale).round().clamp(0.0, u16::MAX as f64) as u16
}

/// Converts an engineering value to its fixed-point wire unit, saturating to `i16`
pub fn scaled_i16(value: f64, scale: f64) -> i16 {
    (value * scale).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}
