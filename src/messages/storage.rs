//! Onboard flash, SD card, blackbox and transponder
//!
//! Dataflash reads are answered with a block that belongs to the caller
//! rather than to the device state, so the registry only acknowledges
//! [`DATAFLASH_READ`](codes::DATAFLASH_READ) and the block is parsed with
//! [`parse_dataflash_read`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tracing::debug;

use crate::core::{ApiVersion, Error, Result};
use crate::protocol::huffman::HuffmanTree;
use crate::protocol::message as codes;
use super::buffer::PayloadReader;
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

const DATAFLASH_SUMMARY_LEN: usize = 13;
/// Compression id for Huffman coded blocks
pub const COMPRESSION_HUFFMAN: u8 = 1;
const ILAP_PROVIDER: TransponderProvider = TransponderProvider {
    id: 1,
    data_length: 6,
};

/// SD card states reported by the summary
pub mod sdcard_state {
    pub const NOT_PRESENT: u8 = 0;
    pub const FATAL: u8 = 1;
    pub const CARD_INIT: u8 = 2;
    pub const FS_INIT: u8 = 3;
    pub const READY: u8 = 4;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataflashSummary {
    pub ready: bool,
    pub supported: bool,
    pub sectors: u32,
    pub total_size: u32,
    pub used_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SdcardSummary {
    pub supported: bool,
    pub state: u8,
    pub filesystem_last_error: u8,
    pub free_size_kb: u32,
    pub total_size_kb: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlackboxConfig {
    pub supported: bool,
    pub device: u8,
    pub rate_num: u8,
    pub rate_denom: u8,
    pub p_denom: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TransponderProvider {
    pub id: u8,
    pub data_length: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransponderConfig {
    pub supported: bool,
    pub providers: Vec<TransponderProvider>,
    pub provider: u8,
    pub data: Vec<u8>,
}

/// One block of flash contents
#[derive(Debug, Clone, PartialEq)]
pub struct DataflashBlock {
    pub address: u32,
    pub data: Bytes,
    /// Size of the block on the wire
    pub wire_size: usize,
    pub compressed: bool,
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::DATAFLASH_SUMMARY, decode_dataflash_summary)
        .ack(codes::DATAFLASH_READ, "Dataflash block received")
        .ack(codes::DATAFLASH_ERASE, "Dataflash erase started")
        .decoder(codes::SDCARD_SUMMARY, decode_sdcard_summary)
        .decoder(codes::BLACKBOX_CONFIG, decode_blackbox)
        .encoder(codes::SET_BLACKBOX_CONFIG, encode_blackbox)
        .ack(codes::SET_BLACKBOX_CONFIG, "Blackbox configuration saved")
        .decoder(codes::TRANSPONDER_CONFIG, decode_transponder)
        .encoder(codes::SET_TRANSPONDER_CONFIG, encode_transponder)
        .ack(codes::SET_TRANSPONDER_CONFIG, "Transponder configuration saved");
}

fn decode_dataflash_summary(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    // older firmware answers with a shorter, unusable summary
    if r.len() < DATAFLASH_SUMMARY_LEN {
        r.rest();
        state.dataflash = DataflashSummary::default();
        return Ok(());
    }
    let flags = r.u8()?;
    let summary = DataflashSummary {
        ready: flags & 0x01 != 0,
        supported: flags & 0x02 != 0,
        sectors: r.u32()?,
        total_size: r.u32()?,
        used_size: r.u32()?,
    };
    state.dataflash = summary;
    Ok(())
}

fn decode_sdcard_summary(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let summary = SdcardSummary {
        supported: r.u8()? & 0x01 != 0,
        state: r.u8()?,
        filesystem_last_error: r.u8()?,
        free_size_kb: r.u32()?,
        total_size_kb: r.u32()?,
    };
    state.sdcard = summary;
    Ok(())
}

fn decode_blackbox(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut config = BlackboxConfig {
        supported: r.u8()? & 0x01 != 0,
        device: r.u8()?,
        rate_num: r.u8()?,
        rate_denom: r.u8()?,
        p_denom: state.blackbox.p_denom,
    };
    if version.at_least(1, 36) {
        config.p_denom = r.u16()?;
    }
    state.blackbox = config;
    Ok(())
}

fn encode_blackbox(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let config = &state.blackbox;
    dst.put_u8(config.device);
    dst.put_u8(config.rate_num);
    dst.put_u8(config.rate_denom);
    if ctx.version.at_least(1, 36) {
        dst.put_u16_le(config.p_denom);
    }
    Ok(())
}

fn decode_transponder(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut config = TransponderConfig::default();
    if version.at_least(1, 33) {
        let count = r.u8()?;
        config.supported = count > 0;
        for _ in 0..count {
            config.providers.push(TransponderProvider {
                id: r.u8()?,
                data_length: r.u8()?,
            });
        }
        config.provider = r.u8()?;
    } else {
        config.supported = r.u8()? & 0x01 != 0;
        config.providers = vec![ILAP_PROVIDER];
        config.provider = ILAP_PROVIDER.id;
    }
    config.data = r.rest().to_vec();
    state.transponder = config;
    Ok(())
}

fn encode_transponder(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    if ctx.version.at_least(1, 33) {
        dst.put_u8(state.transponder.provider);
    }
    dst.put_slice(&state.transponder.data);
    Ok(())
}

/// Builds the request payload for a dataflash read
pub fn encode_dataflash_read_request(version: ApiVersion, address: u32, block_size: u16, allow_compression: bool) -> Bytes {
    let mut dst = BytesMut::with_capacity(7);
    dst.put_u32_le(address);
    if version.at_least(1, 31) {
        dst.put_u16_le(block_size);
    }
    if version.at_least(1, 36) {
        dst.put_u8(allow_compression as u8);
    }
    dst.freeze()
}

/// Parses a dataflash read response, expanding compressed blocks with `tree`.
///
/// The caller compares the returned address with the one it asked for; a
/// mismatch means the block must be requested again.
pub fn parse_dataflash_read(version: ApiVersion, payload: &[u8], tree: Option<&HuffmanTree>) -> Result<DataflashBlock> {
    let mut r = PayloadReader::new(codes::DATAFLASH_READ, payload);
    let address = r.u32()?;
    if !version.at_least(1, 31) {
        let data = Bytes::copy_from_slice(r.rest());
        return Ok(DataflashBlock {
            address,
            wire_size: data.len(),
            data,
            compressed: false,
        });
    }

    let data_size = r.u16()? as usize;
    let compression = r.u8()?;
    match compression {
        0 => {
            let data = Bytes::copy_from_slice(r.bytes(data_size)?);
            Ok(DataflashBlock {
                address,
                data,
                wire_size: data_size,
                compressed: false,
            })
        }
        COMPRESSION_HUFFMAN => {
            let tree = tree.ok_or_else(|| {
                Error::invalid_argument("compressed dataflash block received without a huffman tree")
            })?;
            let char_count = r.u16()? as usize;
            let compressed = r.bytes(data_size.saturating_sub(2))?;
            let data = tree.decode(compressed, char_count)?;
            debug!(address, wire = data_size, expanded = data.len(), "Expanded dataflash block");
            Ok(DataflashBlock {
                address,
                data: Bytes::from(data),
                wire_size: data_size,
                compressed: true,
            })
        }
        other => Err(Error::protocol(format!("unknown dataflash compression type {}", other))),
    }
}
