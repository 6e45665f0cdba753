//! Serial port function and baud rate assignment

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::core::{ApiVersion, Result};
use crate::protocol::message as codes;
use crate::util::{mask_from_names, names_from_mask};
use super::buffer::PayloadReader;
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

/// Baud rates by firmware index
pub const BAUD_RATES: &[&str] = &[
    "AUTO", "9600", "19200", "38400", "57600", "115200", "230400", "250000", "400000", "460800",
    "500000", "921600", "1000000", "1500000", "2000000", "2470000",
];

/// Port functions and their mask bits. Bit 4 is shared by MSP and LTM telemetry.
pub const SERIAL_PORT_FUNCTIONS: &[(&str, u32)] = &[
    ("MSP", 0),
    ("GPS", 1),
    ("TELEMETRY_FRSKY", 2),
    ("TELEMETRY_HOTT", 3),
    ("TELEMETRY_MSP", 4),
    ("TELEMETRY_LTM", 4),
    ("TELEMETRY_SMARTPORT", 5),
    ("RX_SERIAL", 6),
    ("BLACKBOX", 7),
    ("TELEMETRY_MAVLINK", 9),
    ("ESC_SENSOR", 10),
    ("TBS_SMARTAUDIO", 11),
    ("TELEMETRY_IBUS", 12),
    ("IRC_TRAMP", 13),
    ("RUNCAM_DEVICE_CONTROL", 14),
    ("LIDAR_TF", 15),
];

const LEGACY_BAUD_FIELDS: usize = 4 * 4;
const PORT_RECORD: usize = 1 + 2 + 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SerialPort {
    pub identifier: u8,
    /// Used before API 1.6
    pub scenario: u8,
    pub functions: Vec<String>,
    pub msp_baudrate: String,
    pub gps_baudrate: String,
    pub telemetry_baudrate: String,
    pub blackbox_baudrate: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SerialConfig {
    pub ports: Vec<SerialPort>,
    /// Global baud rates, used before API 1.6
    pub msp_baudrate: u32,
    pub cli_baudrate: u32,
    pub gps_baudrate: u32,
    pub gps_passthrough_baudrate: u32,
}

/// Baud rate label for a firmware index
pub fn baud_rate_name(index: u8) -> String {
    BAUD_RATES
        .get(index as usize)
        .map(|rate| rate.to_string())
        .unwrap_or_else(|| BAUD_RATES[0].to_string())
}

/// Firmware index for a baud rate label, `AUTO` when unknown
pub fn baud_rate_index(name: &str) -> u8 {
    BAUD_RATES.iter().position(|rate| *rate == name).unwrap_or(0) as u8
}

/// Function names set in a port function mask
pub fn functions_from_mask(mask: u16) -> Vec<String> {
    names_from_mask(SERIAL_PORT_FUNCTIONS, mask as u32)
        .into_iter()
        .map(String::from)
        .collect()
}

/// Port function mask for a list of function names
pub fn mask_from_functions(functions: &[String]) -> u16 {
    mask_from_names(SERIAL_PORT_FUNCTIONS, functions) as u16
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::CF_SERIAL_CONFIG, decode_serial_config)
        .encoder(codes::SET_CF_SERIAL_CONFIG, encode_serial_config)
        .ack(codes::SET_CF_SERIAL_CONFIG, "Serial configuration saved");
}

fn decode_serial_config(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut config = SerialConfig::default();
    if !version.at_least(1, 6) {
        let count = r.len().saturating_sub(LEGACY_BAUD_FIELDS) / 2;
        for _ in 0..count {
            config.ports.push(SerialPort {
                identifier: r.u8()?,
                scenario: r.u8()?,
                ..Default::default()
            });
        }
        config.msp_baudrate = r.u32()?;
        config.cli_baudrate = r.u32()?;
        config.gps_baudrate = r.u32()?;
        config.gps_passthrough_baudrate = r.u32()?;
    } else {
        for _ in 0..r.records(PORT_RECORD) {
            config.ports.push(SerialPort {
                identifier: r.u8()?,
                functions: functions_from_mask(r.u16()?),
                msp_baudrate: baud_rate_name(r.u8()?),
                gps_baudrate: baud_rate_name(r.u8()?),
                telemetry_baudrate: baud_rate_name(r.u8()?),
                blackbox_baudrate: baud_rate_name(r.u8()?),
                ..Default::default()
            });
        }
    }
    state.serial = config;
    Ok(())
}

fn encode_serial_config(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let config = &state.serial;
    if !ctx.version.at_least(1, 6) {
        for port in &config.ports {
            dst.put_u8(port.scenario);
        }
        dst.put_u32_le(config.msp_baudrate);
        dst.put_u32_le(config.cli_baudrate);
        dst.put_u32_le(config.gps_baudrate);
        dst.put_u32_le(config.gps_passthrough_baudrate);
        return Ok(());
    }

    for port in &config.ports {
        dst.put_u8(port.identifier);
        dst.put_u16_le(mask_from_functions(&port.functions));
        dst.put_u8(baud_rate_index(&port.msp_baudrate));
        dst.put_u8(baud_rate_index(&port.gps_baudrate));
        dst.put_u8(baud_rate_index(&port.telemetry_baudrate));
        dst.put_u8(baud_rate_index(&port.blackbox_baudrate));
    }
    Ok(())
}
