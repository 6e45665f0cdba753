//! PID gains and filter tuning

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::core::{ApiVersion, Result};
use crate::protocol::message as codes;
use super::buffer::PayloadReader;
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

/// Largest setpoint weight the single-byte field can carry
const SETPOINT_WEIGHT_BYTE_MAX: u16 = 254;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PidAdvanced {
    pub roll_pitch_iterm_ignore_rate: u16,
    pub yaw_iterm_ignore_rate: u16,
    pub yaw_p_limit: u16,
    pub delta_method: u8,
    pub vbat_pid_compensation: u8,
    /// Before API 1.40 this byte is the D-term setpoint transition
    pub feedforward_transition: u8,
    pub dterm_setpoint_weight: u16,
    pub tolerance_band: u8,
    pub tolerance_band_reduction: u8,
    pub iterm_throttle_gain: u8,
    pub pid_max_velocity: u16,
    pub pid_max_velocity_yaw: u16,
    pub level_angle_limit: u8,
    pub level_sensitivity: u8,
    pub iterm_throttle_threshold: u16,
    pub iterm_accelerator_gain: u16,
    pub iterm_rotation: u8,
    pub smart_feedforward: u8,
    pub iterm_relax: u8,
    pub iterm_relax_type: u8,
    pub absolute_control_gain: u8,
    pub throttle_boost: u8,
    pub acro_trainer_angle_limit: u8,
    pub feedforward: [u16; 3],
    pub anti_gravity_mode: u8,
    pub d_min: [u8; 3],
    pub d_min_gain: u8,
    pub d_min_advance: u8,
    pub use_integrated_yaw: u8,
    pub integrated_yaw_relax: u8,
    pub iterm_relax_cutoff: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterConfig {
    pub gyro_lowpass_hz: u16,
    pub dterm_lowpass_hz: u16,
    pub yaw_lowpass_hz: u16,
    pub gyro_notch_hz: u16,
    pub gyro_notch_cutoff: u16,
    pub dterm_notch_hz: u16,
    pub dterm_notch_cutoff: u16,
    pub gyro_notch2_hz: u16,
    pub gyro_notch2_cutoff: u16,
    pub dterm_lowpass_type: u8,
    pub gyro_hardware_lpf: u8,
    /// Only meaningful before API 1.41
    pub gyro_32khz_hardware_lpf: u8,
    pub gyro_lowpass2_hz: u16,
    pub gyro_lowpass_type: u8,
    pub gyro_lowpass2_type: u8,
    pub dterm_lowpass2_hz: u16,
    pub dterm_lowpass2_type: u8,
    pub gyro_lowpass_dyn_min_hz: u16,
    pub gyro_lowpass_dyn_max_hz: u16,
    pub dterm_lowpass_dyn_min_hz: u16,
    pub dterm_lowpass_dyn_max_hz: u16,
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::PID, decode_pid)
        .encoder(codes::SET_PID, encode_pid)
        .ack(codes::SET_PID, "PID settings saved")
        .decoder(codes::PIDNAMES, |state, _, r| {
            state.pid_names = super::rx::split_names(r.rest());
            Ok(())
        })
        .decoder(codes::PID_ADVANCED, decode_pid_advanced)
        .encoder(codes::SET_PID_ADVANCED, encode_pid_advanced)
        .ack(codes::SET_PID_ADVANCED, "Advanced PID settings saved")
        .decoder(codes::FILTER_CONFIG, decode_filter_config)
        .encoder(codes::SET_FILTER_CONFIG, encode_filter_config)
        .ack(codes::SET_FILTER_CONFIG, "Filter configuration saved")
        .decoder(codes::PID_CONTROLLER, |state, _, r| {
            state.pid_controller = r.u8()?;
            Ok(())
        })
        .encoder(codes::SET_PID_CONTROLLER, |state, _, dst| {
            dst.put_u8(state.pid_controller);
            Ok(())
        })
        .ack(codes::SET_PID_CONTROLLER, "PID controller changed")
        .decoder(codes::LOOP_TIME, |state, version, r| {
            if version.at_least(1, 8) {
                state.loop_time = r.u16()?;
            }
            Ok(())
        })
        .encoder(codes::SET_LOOP_TIME, |state, _, dst| {
            dst.put_u16_le(state.loop_time);
            Ok(())
        })
        .ack(codes::SET_LOOP_TIME, "Loop time saved");
}

fn decode_pid(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let count = r.records(3);
    let mut pids = Vec::with_capacity(count);
    for _ in 0..count {
        pids.push([r.u8()?, r.u8()?, r.u8()?]);
    }
    state.pids = pids;
    Ok(())
}

fn encode_pid(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    for gains in &state.pids {
        dst.put_slice(gains);
    }
    Ok(())
}

fn decode_pid_advanced(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut pid = PidAdvanced {
        roll_pitch_iterm_ignore_rate: r.u16()?,
        yaw_iterm_ignore_rate: r.u16()?,
        yaw_p_limit: r.u16()?,
        delta_method: r.u8()?,
        vbat_pid_compensation: r.u8()?,
        ..state.pid_advanced.clone()
    };
    if version.at_least(1, 20) {
        pid.feedforward_transition = r.u8()?;
        pid.dterm_setpoint_weight = r.u8()? as u16;
        pid.tolerance_band = r.u8()?;
        pid.tolerance_band_reduction = r.u8()?;
        pid.iterm_throttle_gain = r.u8()?;
        pid.pid_max_velocity = r.u16()?;
        pid.pid_max_velocity_yaw = r.u16()?;
    }
    if version.at_least(1, 24) {
        pid.level_angle_limit = r.u8()?;
        pid.level_sensitivity = r.u8()?;
    }
    if version.at_least(1, 36) {
        pid.iterm_throttle_threshold = r.u16()?;
        pid.iterm_accelerator_gain = r.u16()?;
    }
    if version.at_least(1, 39) {
        pid.dterm_setpoint_weight = r.u16()?;
    }
    if version.at_least(1, 40) {
        pid.iterm_rotation = r.u8()?;
        pid.smart_feedforward = r.u8()?;
        pid.iterm_relax = r.u8()?;
        pid.iterm_relax_type = r.u8()?;
        pid.absolute_control_gain = r.u8()?;
        pid.throttle_boost = r.u8()?;
        pid.acro_trainer_angle_limit = r.u8()?;
        pid.feedforward = [r.u16()?, r.u16()?, r.u16()?];
        pid.anti_gravity_mode = r.u8()?;
    }
    if version.at_least(1, 41) {
        pid.d_min = [r.u8()?, r.u8()?, r.u8()?];
        pid.d_min_gain = r.u8()?;
        pid.d_min_advance = r.u8()?;
        pid.use_integrated_yaw = r.u8()?;
        pid.integrated_yaw_relax = r.u8()?;
    }
    if version.at_least(1, 42) {
        pid.iterm_relax_cutoff = r.u8()?;
    }
    state.pid_advanced = pid;
    Ok(())
}

fn encode_pid_advanced(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let pid = &state.pid_advanced;
    let version = ctx.version;
    dst.put_u16_le(pid.roll_pitch_iterm_ignore_rate);
    dst.put_u16_le(pid.yaw_iterm_ignore_rate);
    dst.put_u16_le(pid.yaw_p_limit);
    dst.put_u8(pid.delta_method);
    dst.put_u8(pid.vbat_pid_compensation);
    if !version.at_least(1, 20) {
        return Ok(());
    }

    dst.put_u8(pid.feedforward_transition);
    dst.put_u8(pid.dterm_setpoint_weight.min(SETPOINT_WEIGHT_BYTE_MAX) as u8);
    dst.put_u8(pid.tolerance_band);
    dst.put_u8(pid.tolerance_band_reduction);
    dst.put_u8(pid.iterm_throttle_gain);
    dst.put_u16_le(pid.pid_max_velocity);
    dst.put_u16_le(pid.pid_max_velocity_yaw);
    if version.at_least(1, 24) {
        dst.put_u8(pid.level_angle_limit);
        dst.put_u8(pid.level_sensitivity);
    }
    if version.at_least(1, 36) {
        dst.put_u16_le(pid.iterm_throttle_threshold);
        dst.put_u16_le(pid.iterm_accelerator_gain);
    }
    if version.at_least(1, 39) {
        dst.put_u16_le(pid.dterm_setpoint_weight);
    }
    if version.at_least(1, 40) {
        dst.put_u8(pid.iterm_rotation);
        dst.put_u8(pid.smart_feedforward);
        dst.put_u8(pid.iterm_relax);
        dst.put_u8(pid.iterm_relax_type);
        dst.put_u8(pid.absolute_control_gain);
        dst.put_u8(pid.throttle_boost);
        dst.put_u8(pid.acro_trainer_angle_limit);
        for feedforward in pid.feedforward {
            dst.put_u16_le(feedforward);
        }
        dst.put_u8(pid.anti_gravity_mode);
    }
    if version.at_least(1, 41) {
        dst.put_slice(&pid.d_min);
        dst.put_u8(pid.d_min_gain);
        dst.put_u8(pid.d_min_advance);
        dst.put_u8(pid.use_integrated_yaw);
        dst.put_u8(pid.integrated_yaw_relax);
    }
    if version.at_least(1, 42) {
        dst.put_u8(pid.iterm_relax_cutoff);
    }
    Ok(())
}

fn decode_filter_config(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut filters = FilterConfig {
        gyro_lowpass_hz: r.u8()? as u16,
        dterm_lowpass_hz: r.u16()?,
        yaw_lowpass_hz: r.u16()?,
        ..state.filters.clone()
    };
    if version.at_least(1, 20) {
        filters.gyro_notch_hz = r.u16()?;
        filters.gyro_notch_cutoff = r.u16()?;
        filters.dterm_notch_hz = r.u16()?;
        filters.dterm_notch_cutoff = r.u16()?;
        if version.at_least(1, 21) {
            filters.gyro_notch2_hz = r.u16()?;
            filters.gyro_notch2_cutoff = r.u16()?;
        }
        if version.at_least(1, 36) {
            filters.dterm_lowpass_type = r.u8()?;
        }
        if version.at_least(1, 39) {
            filters.gyro_hardware_lpf = r.u8()?;
            let gyro_32khz_hardware_lpf = r.u8()?;
            filters.gyro_lowpass_hz = r.u16()?;
            filters.gyro_lowpass2_hz = r.u16()?;
            filters.gyro_lowpass_type = r.u8()?;
            filters.gyro_lowpass2_type = r.u8()?;
            filters.dterm_lowpass2_hz = r.u16()?;
            if version.at_least(1, 41) {
                filters.gyro_32khz_hardware_lpf = 0;
                filters.dterm_lowpass2_type = r.u8()?;
                filters.gyro_lowpass_dyn_min_hz = r.u16()?;
                filters.gyro_lowpass_dyn_max_hz = r.u16()?;
                filters.dterm_lowpass_dyn_min_hz = r.u16()?;
                filters.dterm_lowpass_dyn_max_hz = r.u16()?;
            } else {
                filters.gyro_32khz_hardware_lpf = gyro_32khz_hardware_lpf;
            }
        }
    }
    state.filters = filters;
    Ok(())
}

fn encode_filter_config(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let filters = &state.filters;
    let version = ctx.version;
    dst.put_u8(filters.gyro_lowpass_hz.min(u8::MAX as u16) as u8);
    dst.put_u16_le(filters.dterm_lowpass_hz);
    dst.put_u16_le(filters.yaw_lowpass_hz);
    if !version.at_least(1, 20) {
        return Ok(());
    }

    dst.put_u16_le(filters.gyro_notch_hz);
    dst.put_u16_le(filters.gyro_notch_cutoff);
    dst.put_u16_le(filters.dterm_notch_hz);
    dst.put_u16_le(filters.dterm_notch_cutoff);
    if version.at_least(1, 21) {
        dst.put_u16_le(filters.gyro_notch2_hz);
        dst.put_u16_le(filters.gyro_notch2_cutoff);
    }
    if version.at_least(1, 36) {
        dst.put_u8(filters.dterm_lowpass_type);
    }
    if version.at_least(1, 39) {
        let gyro_32khz_hardware_lpf = if version.at_least(1, 41) {
            0
        } else {
            filters.gyro_32khz_hardware_lpf
        };
        dst.put_u8(filters.gyro_hardware_lpf);
        dst.put_u8(gyro_32khz_hardware_lpf);
        dst.put_u16_le(filters.gyro_lowpass_hz);
        dst.put_u16_le(filters.gyro_lowpass2_hz);
        dst.put_u8(filters.gyro_lowpass_type);
        dst.put_u8(filters.gyro_lowpass2_type);
        dst.put_u16_le(filters.dterm_lowpass2_hz);
    }
    if version.at_least(1, 41) {
        dst.put_u8(filters.dterm_lowpass2_type);
        dst.put_u16_le(filters.gyro_lowpass_dyn_min_hz);
        dst.put_u16_le(filters.gyro_lowpass_dyn_max_hz);
        dst.put_u16_le(filters.dterm_lowpass_dyn_min_hz);
        dst.put_u16_le(filters.dterm_lowpass_dyn_max_hz);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::testing::{decode, encode_indexed, roundtrip};

    fn sample_pid_advanced() -> PidAdvanced {
        PidAdvanced {
            yaw_p_limit: 300,
            vbat_pid_compensation: 1,
            feedforward_transition: 20,
            dterm_setpoint_weight: 300,
            iterm_throttle_gain: 10,
            pid_max_velocity: 1000,
            pid_max_velocity_yaw: 100,
            level_angle_limit: 55,
            level_sensitivity: 50,
            iterm_throttle_threshold: 250,
            iterm_accelerator_gain: 3500,
            iterm_relax: 1,
            throttle_boost: 5,
            feedforward: [60, 60, 100],
            anti_gravity_mode: 1,
            d_min: [20, 22, 0],
            d_min_gain: 27,
            d_min_advance: 20,
            iterm_relax_cutoff: 15,
            ..Default::default()
        }
    }

    #[test]
    fn test_pid_triplets() {
        let state = decode(codes::PID, ApiVersion::new(1, 41, 0), &[42, 85, 35, 46, 90, 38]);
        assert_eq!(state.pids, vec![[42, 85, 35], [46, 90, 38]]);
        let bytes = encode_indexed(codes::SET_PID, &state, ApiVersion::new(1, 41, 0), 0);
        assert_eq!(bytes, vec![42, 85, 35, 46, 90, 38]);
    }

    #[test]
    fn test_pid_advanced_lengths() {
        let mut state = DeviceState::default();
        state.pid_advanced = sample_pid_advanced();
        let expected = [
            ((1, 19), 8),
            ((1, 20), 17),
            ((1, 24), 19),
            ((1, 36), 23),
            ((1, 39), 25),
            ((1, 40), 39),
            ((1, 41), 46),
            ((1, 42), 47),
        ];
        for ((major, minor), len) in expected {
            let bytes = encode_indexed(codes::SET_PID_ADVANCED, &state, ApiVersion::new(major, minor, 0), 0);
            assert_eq!(bytes.len(), len, "version {}.{}", major, minor);
        }
    }

    #[test]
    fn test_setpoint_weight_byte_saturates() {
        let mut state = DeviceState::default();
        state.pid_advanced = sample_pid_advanced();
        let bytes = encode_indexed(codes::SET_PID_ADVANCED, &state, ApiVersion::new(1, 39, 0), 0);
        assert_eq!(bytes[9], 254);
        assert_eq!(u16::from_le_bytes([bytes[23], bytes[24]]), 300);
    }

    #[test]
    fn test_pid_advanced_roundtrip() {
        let mut state = DeviceState::default();
        state.pid_advanced = sample_pid_advanced();
        let (_, decoded) = roundtrip(codes::PID_ADVANCED, codes::SET_PID_ADVANCED, &state, ApiVersion::new(1, 42, 0));
        assert_eq!(decoded.pid_advanced, state.pid_advanced);
    }

    #[test]
    fn test_filter_roundtrip_1_41() {
        let mut state = DeviceState::default();
        state.filters = FilterConfig {
            gyro_lowpass_hz: 300,
            dterm_lowpass_hz: 100,
            yaw_lowpass_hz: 100,
            gyro_notch_hz: 400,
            gyro_notch_cutoff: 300,
            dterm_lowpass_type: 1,
            gyro_lowpass2_hz: 250,
            dterm_lowpass2_hz: 150,
            gyro_lowpass_dyn_min_hz: 200,
            gyro_lowpass_dyn_max_hz: 500,
            dterm_lowpass_dyn_min_hz: 70,
            dterm_lowpass_dyn_max_hz: 170,
            ..Default::default()
        };
        let (bytes, decoded) = roundtrip(codes::FILTER_CONFIG, codes::SET_FILTER_CONFIG, &state, ApiVersion::new(1, 41, 0));
        assert_eq!(bytes.len(), 37);
        // base byte saturates, the 1.39 word carries the real value
        assert_eq!(bytes[0], 255);
        assert_eq!(decoded.filters, state.filters);
    }

    #[test]
    fn test_filter_32khz_lpf_dropped_from_1_41() {
        let mut state = DeviceState::default();
        state.filters.gyro_32khz_hardware_lpf = 1;
        let bytes = encode_indexed(codes::SET_FILTER_CONFIG, &state, ApiVersion::new(1, 40, 0), 0);
        assert_eq!(bytes[19], 1);
        let bytes = encode_indexed(codes::SET_FILTER_CONFIG, &state, ApiVersion::new(1, 41, 0), 0);
        assert_eq!(bytes[19], 0);
    }

    #[test]
    fn test_loop_time_needs_1_8() {
        let state = decode(codes::LOOP_TIME, ApiVersion::new(1, 8, 0), &[0xF4, 0x01]);
        assert_eq!(state.loop_time, 500);
    }
}
