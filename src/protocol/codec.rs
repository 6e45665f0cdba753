use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::core::{Error, MAX_PAYLOAD_SIZE};
use super::frame::{
    crc8_dvb_s2, crc8_dvb_s2_slice, xor_checksum, Direction, Frame, Generation,
    JUMBO_FRAME_MIN_SIZE, PREAMBLE, PROTO_V1, PROTO_V2,
};

/// Parser position inside the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Idle,
    ProtoIdentifier,
    DirectionV1,
    DirectionV2,
    FlagV2,
    LengthV1,
    CodeV1,
    CodeJumboV1,
    JumboLengthLow,
    JumboLengthHigh,
    CodeV2Low,
    CodeV2High,
    LengthV2Low,
    LengthV2High,
    Payload,
    Checksum,
}

/// Resumable MSP frame codec.
///
/// Decoding is a byte-at-a-time state machine so frames split across any
/// number of transport reads are reassembled. A frame whose checksum does not
/// match is still yielded, with `crc_error` set and an empty payload, so the
/// request waiting on its code can be resolved.
#[derive(Debug)]
pub struct MspCodec {
    state: DecodeState,
    generation: Generation,
    direction: Direction,
    jumbo: bool,
    flag: u8,
    code: u16,
    expected: usize,
    payload: BytesMut,
    max_payload_size: usize,
    force_v2: bool,
    crc_errors: u64,
}

impl Default for MspCodec {
    fn default() -> Self {
        MspCodec::new()
    }
}

impl MspCodec {
    /// Creates a new codec accepting payloads up to the protocol maximum
    pub fn new() -> Self {
        MspCodec::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    /// Creates a codec that discards frames announcing more than `max_payload_size` bytes
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        MspCodec {
            state: DecodeState::Idle,
            generation: Generation::V1,
            direction: Direction::Response,
            jumbo: false,
            flag: 0,
            code: 0,
            expected: 0,
            payload: BytesMut::new(),
            max_payload_size,
            force_v2: false,
            crc_errors: 0,
        }
    }

    /// Encode every outgoing frame as generation 2
    pub fn force_v2(mut self, force: bool) -> Self {
        self.force_v2 = force;
        self
    }

    /// Number of frames that failed their checksum so far
    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }

    /// Returns true when the parser is between frames
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Idle
    }

    /// Feeds a byte run and returns every frame it completes
    pub fn decode_stream(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut src = BytesMut::from(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame(&mut src) {
            frames.push(frame);
        }
        frames
    }

    /// Drops any partially parsed frame
    pub fn reset(&mut self) {
        self.state = DecodeState::Idle;
        self.jumbo = false;
        self.flag = 0;
        self.expected = 0;
        self.payload.clear();
    }

    fn begin_payload(&mut self) {
        if self.expected > self.max_payload_size {
            warn!(
                code = self.code,
                length = self.expected,
                limit = self.max_payload_size,
                "Discarding oversized frame"
            );
            self.reset();
            return;
        }
        self.payload.clear();
        self.payload.reserve(self.expected);
        self.state = if self.expected > 0 {
            DecodeState::Payload
        } else {
            DecodeState::Checksum
        };
    }

    fn expected_checksum(&self) -> u8 {
        match self.generation {
            Generation::V1 => {
                let seed = if self.jumbo {
                    JUMBO_FRAME_MIN_SIZE as u8
                        ^ (self.expected & 0xFF) as u8
                        ^ ((self.expected >> 8) & 0xFF) as u8
                } else {
                    self.expected as u8
                };
                xor_checksum(seed ^ self.code as u8, &self.payload)
            }
            Generation::V2 => {
                let mut crc = crc8_dvb_s2(0, self.flag);
                crc = crc8_dvb_s2(crc, (self.code & 0xFF) as u8);
                crc = crc8_dvb_s2(crc, (self.code >> 8) as u8);
                crc = crc8_dvb_s2(crc, (self.expected & 0xFF) as u8);
                crc = crc8_dvb_s2(crc, ((self.expected >> 8) & 0xFF) as u8);
                crc8_dvb_s2_slice(crc, &self.payload)
            }
        }
    }

    fn finish(&mut self, received: u8) -> Frame {
        let crc_error = received != self.expected_checksum();
        let payload = if crc_error {
            self.crc_errors += 1;
            warn!(code = self.code, "Frame failed checksum");
            self.payload.clear();
            BytesMut::new().freeze()
        } else {
            self.payload.split().freeze()
        };
        let frame = Frame {
            code: self.code,
            payload,
            direction: self.direction,
            generation: self.generation,
            crc_error,
            unsupported: self.direction == Direction::Unsupported,
        };
        self.reset();
        frame
    }

    fn next_frame(&mut self, src: &mut BytesMut) -> Option<Frame> {
        while !src.is_empty() {
            if self.state == DecodeState::Payload {
                let take = (self.expected - self.payload.len()).min(src.len());
                self.payload.extend_from_slice(&src[..take]);
                src.advance(take);
                if self.payload.len() >= self.expected {
                    self.state = DecodeState::Checksum;
                }
                continue;
            }

            let byte = src[0];
            src.advance(1);
            match self.state {
                DecodeState::Idle => {
                    if byte == PREAMBLE {
                        self.state = DecodeState::ProtoIdentifier;
                    }
                }
                DecodeState::ProtoIdentifier => match byte {
                    PROTO_V1 => {
                        self.generation = Generation::V1;
                        self.state = DecodeState::DirectionV1;
                    }
                    PROTO_V2 => {
                        self.generation = Generation::V2;
                        self.state = DecodeState::DirectionV2;
                    }
                    other => {
                        debug!(byte = other, "Unknown protocol identifier");
                        self.reset();
                    }
                },
                DecodeState::DirectionV1 | DecodeState::DirectionV2 => match Direction::from_byte(byte) {
                    Some(direction) => {
                        self.direction = direction;
                        self.state = if self.state == DecodeState::DirectionV1 {
                            DecodeState::LengthV1
                        } else {
                            DecodeState::FlagV2
                        };
                    }
                    // a frame without a known direction is dropped and the parser
                    // resyncs on the next preamble instead of guessing one
                    None => {
                        debug!(byte, "Unknown direction marker");
                        self.reset();
                    }
                },
                DecodeState::FlagV2 => {
                    self.flag = byte;
                    self.state = DecodeState::CodeV2Low;
                }
                DecodeState::LengthV1 => {
                    self.expected = byte as usize;
                    if self.expected == JUMBO_FRAME_MIN_SIZE {
                        self.jumbo = true;
                        self.state = DecodeState::CodeJumboV1;
                    } else {
                        self.state = DecodeState::CodeV1;
                    }
                }
                DecodeState::CodeV1 => {
                    self.code = byte as u16;
                    self.begin_payload();
                }
                DecodeState::CodeJumboV1 => {
                    self.code = byte as u16;
                    self.state = DecodeState::JumboLengthLow;
                }
                DecodeState::JumboLengthLow => {
                    self.expected = byte as usize;
                    self.state = DecodeState::JumboLengthHigh;
                }
                DecodeState::JumboLengthHigh => {
                    self.expected |= (byte as usize) << 8;
                    self.begin_payload();
                }
                DecodeState::CodeV2Low => {
                    self.code = byte as u16;
                    self.state = DecodeState::CodeV2High;
                }
                DecodeState::CodeV2High => {
                    self.code |= (byte as u16) << 8;
                    self.state = DecodeState::LengthV2Low;
                }
                DecodeState::LengthV2Low => {
                    self.expected = byte as usize;
                    self.state = DecodeState::LengthV2High;
                }
                DecodeState::LengthV2High => {
                    self.expected |= (byte as usize) << 8;
                    self.begin_payload();
                }
                DecodeState::Checksum => return Some(self.finish(byte)),
                // copied in bulk above
                DecodeState::Payload => {}
            }
        }
        None
    }
}

impl Decoder for MspCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.next_frame(src))
    }
}

impl Encoder<Frame> for MspCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let item = if self.force_v2 {
            item.with_generation(Generation::V2)
        } else {
            item
        };
        item.encode_into(dst)
    }
}
