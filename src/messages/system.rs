//! Identification, status and housekeeping messages

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::core::{ApiVersion, Result};
use crate::protocol::message as codes;
use super::buffer::{put_str, PayloadReader};
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

/// Longest craft name the firmware stores
pub const MAX_NAME_LENGTH: usize = 64;

/// Length of the board signature block
pub const SIGNATURE_LENGTH: usize = 32;

/// Reboot targets understood by the firmware
pub mod reboot_type {
    pub const FIRMWARE: u8 = 0;
    pub const BOOTLOADER: u8 = 1;
    pub const MSC: u8 = 2;
    pub const MSC_UTC: u8 = 3;
}

/// Firmware and board identification
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Identity {
    pub msp_protocol_version: u8,
    pub fc_variant: String,
    pub fc_version: String,
    pub build_info: String,
    pub board_identifier: String,
    pub board_version: u16,
    pub board_type: u8,
    pub comm_capabilities: u8,
    pub target_name: String,
    pub board_name: String,
    pub manufacturer_id: String,
    pub signature: Vec<u8>,
    /// 255 when the firmware does not report it
    pub mcu_type_id: u8,
    pub name: String,
    pub uid: [u32; 3],
}

/// Live controller status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Status {
    pub cycle_time: u16,
    pub i2c_errors: u16,
    pub active_sensors: u16,
    pub mode_flags: u32,
    pub profile: u8,
    pub cpu_load: u16,
    pub profile_count: u8,
    pub rate_profile: u8,
    pub flight_mode_flags: Vec<u8>,
    pub arming_disable_count: u8,
    pub arming_disable_flags: u32,
}

/// Requested arming lockout
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArmingControl {
    pub arming_disabled: bool,
    pub runaway_takeoff_prevention_disabled: bool,
}

/// Reboot request and the controller's answer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reboot {
    pub reboot_type: u8,
    /// Mass-storage readiness reported for storage reboots
    pub storage_ready: Option<bool>,
}

/// Profile copy request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CopyProfile {
    /// 0 copies a PID profile, 1 a rate profile
    pub kind: u8,
    pub destination: u8,
    pub source: u8,
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::API_VERSION, decode_api_version)
        .decoder(codes::FC_VARIANT, decode_fc_variant)
        .decoder(codes::FC_VERSION, decode_fc_version)
        .decoder(codes::BUILD_INFO, decode_build_info)
        .decoder(codes::BOARD_INFO, decode_board_info)
        .decoder(codes::NAME, decode_name)
        .encoder(codes::SET_NAME, encode_name)
        .ack(codes::SET_NAME, "Craft name saved")
        .decoder(codes::UID, decode_uid)
        .decoder(codes::STATUS, decode_status)
        .decoder(codes::STATUS_EX, decode_status_ex)
        .encoder(codes::SET_REBOOT, encode_reboot)
        .decoder(codes::SET_REBOOT, decode_reboot)
        .encoder(codes::ARMING_DISABLE, encode_arming_disable)
        .ack(codes::ARMING_DISABLE, "Arming lockout updated")
        .encoder(codes::SET_RTC, encode_rtc)
        .ack(codes::SET_RTC, "Real time clock set")
        .encoder(codes::COPY_PROFILE, encode_copy_profile)
        .ack(codes::COPY_PROFILE, "Profile copied")
        .encoder(codes::SELECT_SETTING, encode_select_setting)
        .ack(codes::SELECT_SETTING, "Profile selected")
        .ack(codes::EEPROM_WRITE, "Settings saved to EEPROM")
        .ack(codes::RESET_CONF, "Settings reset")
        .ack(codes::ACC_CALIBRATION, "Accelerometer calibration started")
        .ack(codes::MAG_CALIBRATION, "Magnetometer calibration started")
        // recognised so replies are logged by name; their payloads are not interpreted
        .ack(codes::OSD_CONFIG, "OSD configuration received")
        .ack(codes::SET_OSD_CONFIG, "OSD configuration saved")
        .ack(codes::OSD_CHAR_READ, "OSD character received")
        .ack(codes::OSD_CHAR_WRITE, "OSD character written")
        .ack(codes::VTX_CONFIG, "VTX configuration received")
        .ack(codes::SET_VTX_CONFIG, "VTX configuration saved")
        .ack(codes::SERVO_MIX_RULES, "Servo mix rules received")
        .ack(codes::DISPLAYPORT, "Displayport command sent")
        .ack(codes::SET_RESET_CURR_PID, "PID profile reset");
}

fn decode_api_version(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let protocol = r.u8()?;
    let major = r.u8()?;
    let minor = r.u8()?;
    state.identity.msp_protocol_version = protocol;
    state.api_version = ApiVersion::new(major, minor, 0);
    Ok(())
}

fn decode_fc_variant(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    state.identity.fc_variant = r.fixed_str(4)?;
    Ok(())
}

fn decode_fc_version(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let (major, minor, patch) = (r.u8()?, r.u8()?, r.u8()?);
    state.identity.fc_version = format!("{}.{}.{}", major, minor, patch);
    Ok(())
}

fn decode_build_info(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let date = r.fixed_str(11)?;
    let time = r.fixed_str(8)?;
    state.identity.build_info = format!("{} {}", date, time);
    Ok(())
}

fn decode_board_info(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let board_identifier = r.fixed_str(4)?;
    let board_version = r.u16()?;
    let board_type = if version.at_least(1, 35) { r.u8()? } else { 0 };

    let (comm_capabilities, target_name) = if version.at_least(1, 37) {
        (r.u8()?, r.len_prefixed_str()?)
    } else {
        (0, String::new())
    };

    let (board_name, manufacturer_id, signature) = if version.at_least(1, 39) {
        let board_name = r.len_prefixed_str()?;
        let manufacturer_id = r.len_prefixed_str()?;
        let signature = r.bytes(SIGNATURE_LENGTH)?.to_vec();
        (board_name, manufacturer_id, signature)
    } else {
        (String::new(), String::new(), Vec::new())
    };

    let mcu_type_id = if version.at_least(1, 41) { r.u8()? } else { 255 };

    let identity = &mut state.identity;
    identity.board_identifier = board_identifier;
    identity.board_version = board_version;
    identity.board_type = board_type;
    identity.comm_capabilities = comm_capabilities;
    identity.target_name = target_name;
    identity.board_name = board_name;
    identity.manufacturer_id = manufacturer_id;
    identity.signature = signature;
    identity.mcu_type_id = mcu_type_id;
    Ok(())
}

fn decode_name(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let name: String = r.rest().iter().take_while(|&&b| b != 0).map(|&b| b as char).collect();
    state.identity.name = name;
    Ok(())
}

fn encode_name(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    put_str(dst, &state.identity.name, MAX_NAME_LENGTH);
    Ok(())
}

fn decode_uid(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let uid = [r.u32()?, r.u32()?, r.u32()?];
    state.identity.uid = uid;
    Ok(())
}

fn decode_status(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let cycle_time = r.u16()?;
    let i2c_errors = r.u16()?;
    let active_sensors = r.u16()?;
    let mode_flags = r.u32()?;
    let profile = r.u8()?;

    let status = &mut state.status;
    status.cycle_time = cycle_time;
    status.i2c_errors = i2c_errors;
    status.active_sensors = active_sensors;
    status.mode_flags = mode_flags;
    status.profile = profile;
    Ok(())
}

fn decode_status_ex(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut status = Status {
        cycle_time: r.u16()?,
        i2c_errors: r.u16()?,
        active_sensors: r.u16()?,
        mode_flags: r.u32()?,
        profile: r.u8()?,
        cpu_load: r.u16()?,
        ..Default::default()
    };
    if version.at_least(1, 16) {
        status.profile_count = r.u8()?;
        status.rate_profile = r.u8()?;
        if version.at_least(1, 36) {
            let byte_count = r.u8()? as usize;
            status.flight_mode_flags = r.bytes(byte_count)?.to_vec();
            status.arming_disable_count = r.u8()?;
            status.arming_disable_flags = r.u32()?;
        }
    }
    state.status = status;
    Ok(())
}

fn encode_reboot(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    dst.put_u8(state.reboot.reboot_type);
    Ok(())
}

fn decode_reboot(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut storage_ready = None;
    if version.at_least(1, 40) && !r.is_empty() {
        let reboot_type = r.u8()?;
        if reboot_type == reboot_type::MSC || reboot_type == reboot_type::MSC_UTC {
            storage_ready = Some(r.u8()? != 0);
        }
    }
    if storage_ready == Some(false) {
        tracing::warn!("Storage device not ready for mass-storage reboot");
    }
    state.reboot.storage_ready = storage_ready;
    Ok(())
}

fn encode_arming_disable(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    dst.put_u8(state.arming_control.arming_disabled as u8);
    // ignored by the firmware while arming is disabled
    dst.put_u8(state.arming_control.runaway_takeoff_prevention_disabled as u8);
    Ok(())
}

fn encode_rtc(_: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    use chrono::{Datelike, Timelike};

    let now = ctx.now;
    if ctx.version.at_least(1, 41) {
        dst.put_u32_le(now.timestamp() as u32);
        dst.put_u16_le(now.timestamp_subsec_millis() as u16);
    } else {
        dst.put_u16_le(now.year() as u16);
        dst.put_u8(now.month() as u8);
        dst.put_u8(now.day() as u8);
        dst.put_u8(now.hour() as u8);
        dst.put_u8(now.minute() as u8);
        dst.put_u8(now.second() as u8);
    }
    Ok(())
}

fn encode_copy_profile(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    dst.put_u8(state.copy_profile.kind);
    dst.put_u8(state.copy_profile.destination);
    dst.put_u8(state.copy_profile.source);
    Ok(())
}

fn encode_select_setting(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    dst.put_u8(state.selected_profile);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::testing::{decode, encode_indexed};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_uninterpreted_replies_are_acknowledged() {
        let registry = Registry::standard();
        let mut state = DeviceState::default();
        let before = state.clone();
        for code in [
            codes::OSD_CONFIG,
            codes::SET_OSD_CONFIG,
            codes::OSD_CHAR_READ,
            codes::OSD_CHAR_WRITE,
            codes::VTX_CONFIG,
            codes::SET_VTX_CONFIG,
            codes::SERVO_MIX_RULES,
            codes::DISPLAYPORT,
            codes::SET_RESET_CURR_PID,
        ] {
            assert!(
                registry.decode(code, &mut state, ApiVersion::new(1, 41, 0), &[1, 2, 3]).unwrap(),
                "{}",
                codes::describe(code)
            );
        }
        assert_eq!(state, before);
    }

    #[test]
    fn test_api_version_handshake() {
        let state = decode(codes::API_VERSION, ApiVersion::UNKNOWN, &[0, 1, 41]);
        assert_eq!(state.api_version, ApiVersion::new(1, 41, 0));
        assert_eq!(state.identity.msp_protocol_version, 0);
    }

    #[test]
    fn test_board_info_by_version() {
        let mut payload = b"S405".to_vec();
        payload.extend([0x02, 0x00]); // board version
        payload.push(2); // board type
        payload.push(0x03); // comm capabilities
        payload.push(4);
        payload.extend(b"F405");
        payload.push(3);
        payload.extend(b"OMN");
        payload.push(2);
        payload.extend(b"AB");
        payload.extend([7u8; SIGNATURE_LENGTH]);
        payload.push(5); // mcu

        let state = decode(codes::BOARD_INFO, ApiVersion::new(1, 41, 0), &payload);
        let id = &state.identity;
        assert_eq!(id.board_identifier, "S405");
        assert_eq!(id.board_version, 2);
        assert_eq!(id.target_name, "F405");
        assert_eq!(id.board_name, "OMN");
        assert_eq!(id.manufacturer_id, "AB");
        assert_eq!(id.signature.len(), SIGNATURE_LENGTH);
        assert_eq!(id.mcu_type_id, 5);

        // pre-1.35 payload is identifier and version only
        let state = decode(codes::BOARD_INFO, ApiVersion::new(1, 31, 0), &payload[..6]);
        assert_eq!(state.identity.board_type, 0);
        assert_eq!(state.identity.mcu_type_id, 255);
    }

    #[test]
    fn test_status_ex_layouts() {
        let mut payload = vec![0xE8, 0x03, 0, 0, 0x2F, 0, 1, 0, 0, 0, 2, 15, 0];
        let old = decode(codes::STATUS_EX, ApiVersion::new(1, 15, 0), &payload);
        assert_eq!(old.status.cycle_time, 1000);
        assert_eq!(old.status.cpu_load, 15);
        assert_eq!(old.status.profile_count, 0);

        payload.extend([3, 1]); // profile count, rate profile
        payload.extend([2, 0xAA, 0xBB]); // flight mode flags
        payload.push(24);
        payload.extend(0x0000_0100u32.to_le_bytes());
        let new = decode(codes::STATUS_EX, ApiVersion::new(1, 36, 0), &payload);
        assert_eq!(new.status.profile_count, 3);
        assert_eq!(new.status.flight_mode_flags, vec![0xAA, 0xBB]);
        assert_eq!(new.status.arming_disable_count, 24);
        assert_eq!(new.status.arming_disable_flags, 0x100);
    }

    #[test]
    fn test_short_status_leaves_state() {
        let registry = Registry::standard();
        let mut state = DeviceState::default();
        state.status.cycle_time = 125;
        let err = registry.decode(codes::STATUS, &mut state, ApiVersion::new(1, 41, 0), &[1, 2, 3]);
        assert!(err.is_err());
        assert_eq!(state.status.cycle_time, 125);
    }

    #[test]
    fn test_name_truncated() {
        let mut state = DeviceState::default();
        state.identity.name = "x".repeat(80);
        let bytes = encode_indexed(codes::SET_NAME, &state, ApiVersion::new(1, 41, 0), 0);
        assert_eq!(bytes.len(), MAX_NAME_LENGTH);
        let decoded = decode(codes::NAME, ApiVersion::new(1, 41, 0), &bytes);
        assert_eq!(decoded.identity.name.len(), MAX_NAME_LENGTH);
    }

    #[test]
    fn test_rtc_layout_by_version() {
        let registry = Registry::standard();
        let state = DeviceState::default();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 15).unwrap();

        let new = registry
            .encode(codes::SET_RTC, &state, &EncodeContext::new(ApiVersion::new(1, 41, 0)).at(now))
            .unwrap();
        assert_eq!(new.len(), 6);
        assert_eq!(u32::from_le_bytes([new[0], new[1], new[2], new[3]]), now.timestamp() as u32);

        let old = registry
            .encode(codes::SET_RTC, &state, &EncodeContext::new(ApiVersion::new(1, 40, 0)).at(now))
            .unwrap();
        assert_eq!(&old[..], &[0xE8, 0x07, 3, 9, 12, 30, 15]);
    }

    #[test]
    fn test_msc_reboot_reports_storage() {
        let state = decode(codes::SET_REBOOT, ApiVersion::new(1, 40, 0), &[reboot_type::MSC, 0]);
        assert_eq!(state.reboot.storage_ready, Some(false));
        let state = decode(codes::SET_REBOOT, ApiVersion::new(1, 40, 0), &[reboot_type::FIRMWARE]);
        assert_eq!(state.reboot.storage_ready, None);
    }

    #[test]
    fn test_arming_disable_payload() {
        let mut state = DeviceState::default();
        state.arming_control.arming_disabled = true;
        let bytes = encode_indexed(codes::ARMING_DISABLE, &state, ApiVersion::new(1, 37, 0), 0);
        assert_eq!(bytes, vec![1, 0]);
    }
}
