//! Wire frames for both MSP generations

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Frame start byte
pub const PREAMBLE: u8 = b'$';
/// Second preamble byte of a generation 1 frame
pub const PROTO_V1: u8 = b'M';
/// Second preamble byte of a generation 2 frame
pub const PROTO_V2: u8 = b'X';
/// Generation 1 length byte announcing a 16-bit jumbo length
pub const JUMBO_FRAME_MIN_SIZE: usize = 255;

/// Bytes a generation 1 frame adds around its payload
pub const V1_OVERHEAD: usize = 6;
/// Bytes a generation 2 frame adds around its payload
pub const V2_OVERHEAD: usize = 9;

/// Message direction marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// `<`: host to flight controller
    Request,
    /// `>`: flight controller to host
    Response,
    /// `!`: flight controller does not implement the code
    Unsupported,
}

impl Direction {
    /// Returns the marker byte
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::Request => b'<',
            Direction::Response => b'>',
            Direction::Unsupported => b'!',
        }
    }

    /// Parses a marker byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'<' => Some(Direction::Request),
            b'>' => Some(Direction::Response),
            b'!' => Some(Direction::Unsupported),
            _ => None,
        }
    }
}

/// Frame generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Generation {
    /// `$M`: 8-bit code, XOR checksum
    V1,
    /// `$X`: 16-bit code and length, CRC8 DVB-S2
    V2,
}

/// One delimited unit on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u16,
    pub payload: Bytes,
    pub direction: Direction,
    pub generation: Generation,
    /// Checksum did not match; the payload has been emptied
    pub crc_error: bool,
    /// The device answered with the `!` marker
    pub unsupported: bool,
}

impl Frame {
    /// Creates a request frame
    pub fn request(code: u16, payload: impl Into<Bytes>) -> Self {
        Frame::new(code, payload.into(), Direction::Request)
    }

    /// Creates a response frame
    pub fn response(code: u16, payload: impl Into<Bytes>) -> Self {
        Frame::new(code, payload.into(), Direction::Response)
    }

    fn new(code: u16, payload: Bytes, direction: Direction) -> Self {
        let generation = if code <= crate::core::MAX_V1_CODE {
            Generation::V1
        } else {
            Generation::V2
        };
        Frame {
            code,
            payload,
            direction,
            generation,
            crc_error: false,
            unsupported: direction == Direction::Unsupported,
        }
    }

    /// Forces the frame generation used when encoding
    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }

    /// Number of bytes this frame occupies on the wire
    pub fn encoded_len(&self) -> usize {
        match self.generation {
            Generation::V1 if self.payload.len() >= JUMBO_FRAME_MIN_SIZE => {
                V1_OVERHEAD + 2 + self.payload.len()
            }
            Generation::V1 => V1_OVERHEAD + self.payload.len(),
            Generation::V2 => V2_OVERHEAD + self.payload.len(),
        }
    }

    /// Serializes the frame into `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) -> crate::core::Result<()> {
        match self.generation {
            Generation::V1 => encode_v1(self.code, &self.payload, self.direction, dst),
            Generation::V2 => encode_v2(self.code, &self.payload, self.direction, dst),
        }
    }

    /// Serializes the frame into a fresh buffer
    pub fn to_bytes(&self) -> crate::core::Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut dst)?;
        Ok(dst.freeze())
    }
}

/// One step of CRC8 DVB-S2 (polynomial 0xD5)
pub fn crc8_dvb_s2(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    for _ in 0..8 {
        if crc & 0x80 != 0 {
            crc = (crc << 1) ^ 0xD5;
        } else {
            crc <<= 1;
        }
    }
    crc
}

/// CRC8 DVB-S2 over a byte run
pub fn crc8_dvb_s2_slice(crc: u8, data: &[u8]) -> u8 {
    data.iter().fold(crc, |crc, &b| crc8_dvb_s2(crc, b))
}

/// XOR checksum over a byte run
pub fn xor_checksum(seed: u8, data: &[u8]) -> u8 {
    data.iter().fold(seed, |acc, &b| acc ^ b)
}

/// Writes a generation 1 frame, switching to the jumbo length form for long payloads
pub fn encode_v1(code: u16, payload: &[u8], direction: Direction, dst: &mut BytesMut) -> crate::core::Result<()> {
    if code > crate::core::MAX_V1_CODE {
        return Err(crate::core::Error::protocol(format!(
            "code {} does not fit a generation 1 frame",
            code
        )));
    }
    if payload.len() > u16::MAX as usize {
        return Err(crate::core::Error::protocol(format!(
            "payload of {} bytes exceeds the jumbo frame limit",
            payload.len()
        )));
    }
    let code = code as u8;
    dst.reserve(V1_OVERHEAD + 2 + payload.len());
    dst.put_u8(PREAMBLE);
    dst.put_u8(PROTO_V1);
    dst.put_u8(direction.as_byte());

    let mut checksum;
    if payload.len() >= JUMBO_FRAME_MIN_SIZE {
        let len = payload.len() as u16;
        dst.put_u8(JUMBO_FRAME_MIN_SIZE as u8);
        dst.put_u8(code);
        dst.put_u16_le(len);
        checksum = JUMBO_FRAME_MIN_SIZE as u8 ^ code ^ (len & 0xFF) as u8 ^ (len >> 8) as u8;
    } else {
        dst.put_u8(payload.len() as u8);
        dst.put_u8(code);
        checksum = payload.len() as u8 ^ code;
    }
    dst.extend_from_slice(payload);
    checksum = xor_checksum(checksum, payload);
    dst.put_u8(checksum);
    Ok(())
}

/// Writes a generation 2 frame
pub fn encode_v2(code: u16, payload: &[u8], direction: Direction, dst: &mut BytesMut) -> crate::core::Result<()> {
    if payload.len() > u16::MAX as usize {
        return Err(crate::core::Error::protocol(format!(
            "payload of {} bytes exceeds the generation 2 limit",
            payload.len()
        )));
    }
    dst.reserve(V2_OVERHEAD + payload.len());
    dst.put_u8(PREAMBLE);
    dst.put_u8(PROTO_V2);
    dst.put_u8(direction.as_byte());
    let start = dst.len();
    dst.put_u8(0); // flag
    dst.put_u16_le(code);
    dst.put_u16_le(payload.len() as u16);
    dst.extend_from_slice(payload);
    let crc = crc8_dvb_s2_slice(0, &dst[start..]);
    dst.put_u8(crc);
    Ok(())
}
