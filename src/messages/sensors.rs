//! Sensor hardware, alignment, compass and GPS configuration

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::core::{ApiVersion, Result};
use crate::protocol::message as codes;
use super::buffer::{scaled_i16, PayloadReader};
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorAlignment {
    pub align_gyro: u8,
    pub align_acc: u8,
    pub align_mag: u8,
    /// Read-only, reported from API 1.41
    pub gyro_detection_flags: u8,
    pub gyro_to_use: u8,
    pub gyro_1_align: u8,
    pub gyro_2_align: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorConfig {
    pub acc_hardware: u8,
    pub baro_hardware: u8,
    pub mag_hardware: u8,
}

/// Board mounting offsets in degrees
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoardAlignment {
    pub roll: i16,
    pub pitch: i16,
    pub yaw: i16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpsConfig {
    pub provider: u8,
    pub ublox_sbas: u8,
    pub auto_config: u8,
    pub auto_baud: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpsRescue {
    pub angle: u16,
    pub initial_altitude_m: u16,
    pub descent_distance_m: u16,
    pub rescue_groundspeed: u16,
    pub throttle_min: u16,
    pub throttle_max: u16,
    pub throttle_hover: u16,
    pub sanity_checks: u8,
    pub min_sats: u8,
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::SENSOR_ALIGNMENT, decode_sensor_alignment)
        .encoder(codes::SET_SENSOR_ALIGNMENT, encode_sensor_alignment)
        .ack(codes::SET_SENSOR_ALIGNMENT, "Sensor alignment saved")
        .decoder(codes::SENSOR_CONFIG, decode_sensor_config)
        .encoder(codes::SET_SENSOR_CONFIG, encode_sensor_config)
        .ack(codes::SET_SENSOR_CONFIG, "Sensor configuration saved")
        .decoder(codes::BOARD_ALIGNMENT_CONFIG, decode_board_alignment)
        .encoder(codes::SET_BOARD_ALIGNMENT_CONFIG, encode_board_alignment)
        .ack(codes::SET_BOARD_ALIGNMENT_CONFIG, "Board alignment saved")
        .decoder(codes::ACC_TRIM, |state, _, r| {
            let trim = [r.i16()?, r.i16()?];
            state.acc_trim = trim;
            Ok(())
        })
        .encoder(codes::SET_ACC_TRIM, |state, _, dst| {
            dst.put_i16_le(state.acc_trim[0]);
            dst.put_i16_le(state.acc_trim[1]);
            Ok(())
        })
        .ack(codes::SET_ACC_TRIM, "Accelerometer trim saved")
        .decoder(codes::COMPASS_CONFIG, |state, _, r| {
            state.mag_declination = r.i16()? as f64 / 100.0;
            Ok(())
        })
        .encoder(codes::SET_COMPASS_CONFIG, |state, _, dst| {
            dst.put_i16_le(scaled_i16(state.mag_declination, 100.0));
            Ok(())
        })
        .ack(codes::SET_COMPASS_CONFIG, "Compass configuration saved")
        .decoder(codes::GPS_CONFIG, decode_gps_config)
        .encoder(codes::SET_GPS_CONFIG, encode_gps_config)
        .ack(codes::SET_GPS_CONFIG, "GPS configuration saved")
        .decoder(codes::GPS_RESCUE, decode_gps_rescue)
        .encoder(codes::SET_GPS_RESCUE, encode_gps_rescue)
        .ack(codes::SET_GPS_RESCUE, "GPS rescue configuration saved");
}

fn decode_sensor_alignment(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut alignment = SensorAlignment {
        align_gyro: r.u8()?,
        align_acc: r.u8()?,
        align_mag: r.u8()?,
        ..state.sensor_alignment.clone()
    };
    if version.at_least(1, 41) {
        alignment.gyro_detection_flags = r.u8()?;
        alignment.gyro_to_use = r.u8()?;
        alignment.gyro_1_align = r.u8()?;
        alignment.gyro_2_align = r.u8()?;
    }
    state.sensor_alignment = alignment;
    Ok(())
}

fn encode_sensor_alignment(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let alignment = &state.sensor_alignment;
    dst.put_u8(alignment.align_gyro);
    dst.put_u8(alignment.align_acc);
    dst.put_u8(alignment.align_mag);
    if ctx.version.at_least(1, 41) {
        dst.put_u8(alignment.gyro_to_use);
        dst.put_u8(alignment.gyro_1_align);
        dst.put_u8(alignment.gyro_2_align);
    }
    Ok(())
}

fn decode_sensor_config(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let config = SensorConfig {
        acc_hardware: r.u8()?,
        baro_hardware: r.u8()?,
        mag_hardware: r.u8()?,
    };
    state.sensor_config = config;
    Ok(())
}

fn encode_sensor_config(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    dst.put_u8(state.sensor_config.acc_hardware);
    dst.put_u8(state.sensor_config.baro_hardware);
    dst.put_u8(state.sensor_config.mag_hardware);
    Ok(())
}

fn decode_board_alignment(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let alignment = BoardAlignment {
        roll: r.i16()?,
        pitch: r.i16()?,
        yaw: r.i16()?,
    };
    state.board_alignment = alignment;
    Ok(())
}

fn encode_board_alignment(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    dst.put_i16_le(state.board_alignment.roll);
    dst.put_i16_le(state.board_alignment.pitch);
    dst.put_i16_le(state.board_alignment.yaw);
    Ok(())
}

fn decode_gps_config(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut config = GpsConfig {
        provider: r.u8()?,
        ublox_sbas: r.u8()?,
        ..state.gps_config.clone()
    };
    if version.at_least(1, 34) {
        config.auto_config = r.u8()?;
        config.auto_baud = r.u8()?;
    }
    state.gps_config = config;
    Ok(())
}

fn encode_gps_config(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let config = &state.gps_config;
    dst.put_u8(config.provider);
    dst.put_u8(config.ublox_sbas);
    if ctx.version.at_least(1, 34) {
        dst.put_u8(config.auto_config);
        dst.put_u8(config.auto_baud);
    }
    Ok(())
}

fn decode_gps_rescue(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let rescue = GpsRescue {
        angle: r.u16()?,
        initial_altitude_m: r.u16()?,
        descent_distance_m: r.u16()?,
        rescue_groundspeed: r.u16()?,
        throttle_min: r.u16()?,
        throttle_max: r.u16()?,
        throttle_hover: r.u16()?,
        sanity_checks: r.u8()?,
        min_sats: r.u8()?,
    };
    state.gps_rescue = rescue;
    Ok(())
}

fn encode_gps_rescue(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let rescue = &state.gps_rescue;
    for value in [
        rescue.angle,
        rescue.initial_altitude_m,
        rescue.descent_distance_m,
        rescue.rescue_groundspeed,
        rescue.throttle_min,
        rescue.throttle_max,
        rescue.throttle_hover,
    ] {
        dst.put_u16_le(value);
    }
    dst.put_u8(rescue.sanity_checks);
    dst.put_u8(rescue.min_sats);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::testing::{decode, encode_indexed, roundtrip};

    #[test]
    fn test_sensor_alignment_asymmetric_layout() {
        let state = decode(codes::SENSOR_ALIGNMENT, ApiVersion::new(1, 41, 0), &[1, 2, 3, 0b11, 1, 5, 6]);
        let alignment = &state.sensor_alignment;
        assert_eq!(alignment.gyro_detection_flags, 0b11);
        assert_eq!(alignment.gyro_2_align, 6);

        // detection flags are not written back
        let bytes = encode_indexed(codes::SET_SENSOR_ALIGNMENT, &state, ApiVersion::new(1, 41, 0), 0);
        assert_eq!(bytes, vec![1, 2, 3, 1, 5, 6]);
        let bytes = encode_indexed(codes::SET_SENSOR_ALIGNMENT, &state, ApiVersion::new(1, 40, 0), 0);
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_board_alignment_roundtrip() {
        let mut state = DeviceState::default();
        state.board_alignment = BoardAlignment { roll: -180, pitch: 0, yaw: 90 };
        let (_, decoded) = roundtrip(
            codes::BOARD_ALIGNMENT_CONFIG,
            codes::SET_BOARD_ALIGNMENT_CONFIG,
            &state,
            ApiVersion::new(1, 41, 0),
        );
        assert_eq!(decoded.board_alignment, state.board_alignment);
    }

    #[test]
    fn test_compass_declination() {
        let mut state = DeviceState::default();
        state.mag_declination = 12.34;
        let (bytes, decoded) = roundtrip(codes::COMPASS_CONFIG, codes::SET_COMPASS_CONFIG, &state, ApiVersion::new(1, 41, 0));
        assert_eq!(bytes, 1234i16.to_le_bytes().to_vec());
        assert_eq!(decoded.mag_declination, 12.34);
    }

    #[test]
    fn test_gps_config_by_version() {
        let mut state = DeviceState::default();
        state.gps_config = GpsConfig { provider: 1, ublox_sbas: 2, auto_config: 1, auto_baud: 1 };
        let (bytes, decoded) = roundtrip(codes::GPS_CONFIG, codes::SET_GPS_CONFIG, &state, ApiVersion::new(1, 34, 0));
        assert_eq!(bytes.len(), 4);
        assert_eq!(decoded.gps_config, state.gps_config);
        let bytes = encode_indexed(codes::SET_GPS_CONFIG, &state, ApiVersion::new(1, 33, 0), 0);
        assert_eq!(bytes.len(), 2);
    }

    #[test]
    fn test_gps_rescue_roundtrip() {
        let mut state = DeviceState::default();
        state.gps_rescue = GpsRescue {
            angle: 32,
            initial_altitude_m: 50,
            descent_distance_m: 200,
            rescue_groundspeed: 2000,
            throttle_min: 1200,
            throttle_max: 1600,
            throttle_hover: 1280,
            sanity_checks: 1,
            min_sats: 8,
        };
        let (bytes, decoded) = roundtrip(codes::GPS_RESCUE, codes::SET_GPS_RESCUE, &state, ApiVersion::new(1, 41, 0));
        assert_eq!(bytes.len(), 16);
        assert_eq!(decoded.gps_rescue, state.gps_rescue);
    }
}
