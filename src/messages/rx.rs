//! Receiver, rates, failsafe and auxiliary switch configuration

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::core::{ApiVersion, Result};
use crate::protocol::message as codes;
use super::buffer::{scaled_u8, PayloadReader};
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

/// Channel value represented by range step zero
pub const RANGE_BASE: u16 = 900;
/// Channel microseconds per range step
pub const RANGE_STEP: u16 = 25;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RxConfig {
    pub serialrx_provider: u8,
    pub stick_max: u16,
    pub stick_center: u16,
    pub stick_min: u16,
    pub spektrum_sat_bind: u8,
    pub rx_min_usec: u16,
    pub rx_max_usec: u16,
    pub rc_interpolation: u8,
    pub rc_interpolation_interval: u8,
    pub airmode_activate_threshold: u16,
    pub rx_spi_protocol: u8,
    pub rx_spi_id: u32,
    pub rx_spi_rf_channel_count: u8,
    pub fpv_cam_angle_degrees: u8,
    pub rc_interpolation_channels: u8,
    pub rc_smoothing_type: u8,
    pub rc_smoothing_input_cutoff: u8,
    pub rc_smoothing_derivative_cutoff: u8,
    pub rc_smoothing_input_type: u8,
    pub rc_smoothing_derivative_type: u8,
}

/// Stick rates and expo curves. Fractional fields travel as hundredths.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RcTuning {
    pub rc_rate: f64,
    pub rc_expo: f64,
    /// Combined roll and pitch rate, used before API 1.7
    pub roll_pitch_rate: f64,
    pub roll_rate: f64,
    pub pitch_rate: f64,
    pub yaw_rate: f64,
    pub dynamic_thr_pid: f64,
    pub throttle_mid: f64,
    pub throttle_expo: f64,
    pub dynamic_thr_breakpoint: u16,
    pub rc_yaw_expo: f64,
    pub rc_yaw_rate: f64,
    pub rc_pitch_rate: f64,
    pub rc_pitch_expo: f64,
    pub throttle_limit_type: u8,
    pub throttle_limit_percent: u8,
    pub roll_rate_limit: u16,
    pub pitch_rate_limit: u16,
    pub yaw_rate_limit: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RcDeadband {
    pub deadband: u8,
    pub yaw_deadband: u8,
    pub alt_hold_deadband: u8,
    pub deadband3d_throttle: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailsafeConfig {
    pub delay: u8,
    pub off_delay: u8,
    pub throttle: u16,
    pub switch_mode: u8,
    pub throttle_low_delay: u16,
    pub procedure: u8,
}

/// Per-channel behaviour on signal loss
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RxFailChannel {
    pub mode: u8,
    pub value: u16,
}

/// Auxiliary channel range activating a flight mode
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModeRange {
    pub id: u8,
    pub aux_channel: u8,
    /// microseconds
    pub start: u16,
    /// microseconds
    pub end: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModeRangeExtra {
    pub id: u8,
    pub mode_logic: u8,
    pub linked_to: u8,
}

/// Auxiliary channel range driving an in-flight adjustment
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdjustmentRange {
    pub slot_index: u8,
    pub aux_channel: u8,
    pub start: u16,
    pub end: u16,
    pub adjustment_function: u8,
    pub aux_switch_channel: u8,
}

/// Range step for a channel value, saturating at the ends of the scale
pub fn range_step(value: u16) -> u8 {
    (value.saturating_sub(RANGE_BASE) / RANGE_STEP).min(u8::MAX as u16) as u8
}

/// Channel value for a range step
pub fn range_value(step: u8) -> u16 {
    RANGE_BASE + RANGE_STEP * step as u16
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::RX_CONFIG, decode_rx_config)
        .encoder(codes::SET_RX_CONFIG, encode_rx_config)
        .ack(codes::SET_RX_CONFIG, "Receiver configuration saved")
        .decoder(codes::RX_MAP, |state, _, r| {
            state.rx_map = r.rest().to_vec();
            Ok(())
        })
        .encoder(codes::SET_RX_MAP, |state, _, dst| {
            dst.put_slice(&state.rx_map);
            Ok(())
        })
        .ack(codes::SET_RX_MAP, "Channel map saved")
        .decoder(codes::RC_TUNING, decode_rc_tuning)
        .encoder(codes::SET_RC_TUNING, encode_rc_tuning)
        .ack(codes::SET_RC_TUNING, "RC tuning saved")
        .decoder(codes::RC_DEADBAND, decode_rc_deadband)
        .encoder(codes::SET_RC_DEADBAND, encode_rc_deadband)
        .ack(codes::SET_RC_DEADBAND, "RC deadband saved")
        .decoder(codes::FAILSAFE_CONFIG, decode_failsafe)
        .encoder(codes::SET_FAILSAFE_CONFIG, encode_failsafe)
        .ack(codes::SET_FAILSAFE_CONFIG, "Failsafe configuration saved")
        .decoder(codes::RXFAIL_CONFIG, decode_rxfail)
        .encoder(codes::SET_RXFAIL_CONFIG, encode_rxfail)
        .ack(codes::SET_RXFAIL_CONFIG, "Channel failsafe saved")
        .decoder(codes::RSSI_CONFIG, |state, _, r| {
            state.rssi_channel = r.u8()?;
            Ok(())
        })
        .encoder(codes::SET_RSSI_CONFIG, |state, _, dst| {
            dst.put_u8(state.rssi_channel);
            Ok(())
        })
        .ack(codes::SET_RSSI_CONFIG, "RSSI channel saved")
        .decoder(codes::MODE_RANGES, decode_mode_ranges)
        .encoder(codes::SET_MODE_RANGE, encode_mode_range)
        .ack(codes::SET_MODE_RANGE, "Mode range saved")
        .decoder(codes::MODE_RANGES_EXTRA, decode_mode_ranges_extra)
        .decoder(codes::ADJUSTMENT_RANGES, decode_adjustment_ranges)
        .encoder(codes::SET_ADJUSTMENT_RANGE, encode_adjustment_range)
        .ack(codes::SET_ADJUSTMENT_RANGE, "Adjustment range saved")
        .decoder(codes::BOXNAMES, |state, _, r| {
            state.box_names = split_names(r.rest());
            Ok(())
        })
        .decoder(codes::BOXIDS, |state, _, r| {
            state.box_ids = r.rest().to_vec();
            Ok(())
        });
}

/// Splits a `;` terminated name list
pub(super) fn split_names(data: &[u8]) -> Vec<String> {
    data.split(|&b| b == b';')
        .map(|name| name.iter().map(|&b| b as char).collect::<String>())
        .filter(|name| !name.is_empty())
        .collect()
}

fn decode_rx_config(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut config = RxConfig {
        serialrx_provider: r.u8()?,
        stick_max: r.u16()?,
        stick_center: r.u16()?,
        stick_min: r.u16()?,
        spektrum_sat_bind: r.u8()?,
        rx_min_usec: r.u16()?,
        rx_max_usec: r.u16()?,
        ..Default::default()
    };
    if version.at_least(1, 20) {
        config.rc_interpolation = r.u8()?;
        config.rc_interpolation_interval = r.u8()?;
        config.airmode_activate_threshold = r.u16()?;
        if version.at_least(1, 31) {
            config.rx_spi_protocol = r.u8()?;
            config.rx_spi_id = r.u32()?;
            config.rx_spi_rf_channel_count = r.u8()?;
            config.fpv_cam_angle_degrees = r.u8()?;
            if version.at_least(1, 40) {
                config.rc_interpolation_channels = r.u8()?;
                config.rc_smoothing_type = r.u8()?;
                config.rc_smoothing_input_cutoff = r.u8()?;
                config.rc_smoothing_derivative_cutoff = r.u8()?;
                config.rc_smoothing_input_type = r.u8()?;
                config.rc_smoothing_derivative_type = r.u8()?;
            }
        }
    }
    state.rx_config = config;
    Ok(())
}

fn encode_rx_config(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let config = &state.rx_config;
    dst.put_u8(config.serialrx_provider);
    dst.put_u16_le(config.stick_max);
    dst.put_u16_le(config.stick_center);
    dst.put_u16_le(config.stick_min);
    dst.put_u8(config.spektrum_sat_bind);
    dst.put_u16_le(config.rx_min_usec);
    dst.put_u16_le(config.rx_max_usec);
    if ctx.version.at_least(1, 20) {
        dst.put_u8(config.rc_interpolation);
        dst.put_u8(config.rc_interpolation_interval);
        dst.put_u16_le(config.airmode_activate_threshold);
        if ctx.version.at_least(1, 31) {
            dst.put_u8(config.rx_spi_protocol);
            dst.put_u32_le(config.rx_spi_id);
            dst.put_u8(config.rx_spi_rf_channel_count);
            dst.put_u8(config.fpv_cam_angle_degrees);
            if ctx.version.at_least(1, 40) {
                dst.put_u8(config.rc_interpolation_channels);
                dst.put_u8(config.rc_smoothing_type);
                dst.put_u8(config.rc_smoothing_input_cutoff);
                dst.put_u8(config.rc_smoothing_derivative_cutoff);
                dst.put_u8(config.rc_smoothing_input_type);
                dst.put_u8(config.rc_smoothing_derivative_type);
            }
        }
    }
    Ok(())
}

fn hundredths(r: &mut PayloadReader<'_>) -> Result<f64> {
    Ok(r.u8()? as f64 / 100.0)
}

fn decode_rc_tuning(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut tuning = RcTuning {
        rc_rate: hundredths(r)?,
        rc_expo: hundredths(r)?,
        ..Default::default()
    };
    if version.at_least(1, 7) {
        tuning.roll_rate = hundredths(r)?;
        tuning.pitch_rate = hundredths(r)?;
    } else {
        tuning.roll_pitch_rate = hundredths(r)?;
    }
    tuning.yaw_rate = hundredths(r)?;
    tuning.dynamic_thr_pid = hundredths(r)?;
    tuning.throttle_mid = hundredths(r)?;
    tuning.throttle_expo = hundredths(r)?;
    if version.at_least(1, 7) {
        tuning.dynamic_thr_breakpoint = r.u16()?;
    }
    if version.at_least(1, 10) {
        tuning.rc_yaw_expo = hundredths(r)?;
        if version.at_least(1, 16) {
            tuning.rc_yaw_rate = hundredths(r)?;
        }
    }
    if version.at_least(1, 37) {
        tuning.rc_pitch_rate = hundredths(r)?;
        tuning.rc_pitch_expo = hundredths(r)?;
    }
    if version.at_least(1, 41) {
        tuning.throttle_limit_type = r.u8()?;
        tuning.throttle_limit_percent = r.u8()?;
    }
    if version.at_least(1, 42) {
        tuning.roll_rate_limit = r.u16()?;
        tuning.pitch_rate_limit = r.u16()?;
        tuning.yaw_rate_limit = r.u16()?;
    }
    state.rc_tuning = tuning;
    Ok(())
}

fn encode_rc_tuning(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let tuning = &state.rc_tuning;
    let version = ctx.version;
    dst.put_u8(scaled_u8(tuning.rc_rate, 100.0));
    dst.put_u8(scaled_u8(tuning.rc_expo, 100.0));
    if version.at_least(1, 7) {
        dst.put_u8(scaled_u8(tuning.roll_rate, 100.0));
        dst.put_u8(scaled_u8(tuning.pitch_rate, 100.0));
    } else {
        dst.put_u8(scaled_u8(tuning.roll_pitch_rate, 100.0));
    }
    dst.put_u8(scaled_u8(tuning.yaw_rate, 100.0));
    dst.put_u8(scaled_u8(tuning.dynamic_thr_pid, 100.0));
    dst.put_u8(scaled_u8(tuning.throttle_mid, 100.0));
    dst.put_u8(scaled_u8(tuning.throttle_expo, 100.0));
    if version.at_least(1, 7) {
        dst.put_u16_le(tuning.dynamic_thr_breakpoint);
    }
    if version.at_least(1, 10) {
        dst.put_u8(scaled_u8(tuning.rc_yaw_expo, 100.0));
        if version.at_least(1, 16) {
            dst.put_u8(scaled_u8(tuning.rc_yaw_rate, 100.0));
        }
    }
    if version.at_least(1, 37) {
        dst.put_u8(scaled_u8(tuning.rc_pitch_rate, 100.0));
        dst.put_u8(scaled_u8(tuning.rc_pitch_expo, 100.0));
    }
    if version.at_least(1, 41) {
        dst.put_u8(tuning.throttle_limit_type);
        dst.put_u8(tuning.throttle_limit_percent);
    }
    if version.at_least(1, 42) {
        dst.put_u16_le(tuning.roll_rate_limit);
        dst.put_u16_le(tuning.pitch_rate_limit);
        dst.put_u16_le(tuning.yaw_rate_limit);
    }
    Ok(())
}

fn decode_rc_deadband(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let deadband = r.u8()?;
    let yaw_deadband = r.u8()?;
    let alt_hold_deadband = r.u8()?;
    let throttle = if version.at_least(1, 17) {
        Some(r.u16()?)
    } else {
        None
    };

    let config = &mut state.rc_deadband;
    config.deadband = deadband;
    config.yaw_deadband = yaw_deadband;
    config.alt_hold_deadband = alt_hold_deadband;
    if let Some(throttle) = throttle {
        config.deadband3d_throttle = throttle;
    }
    Ok(())
}

fn encode_rc_deadband(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let config = &state.rc_deadband;
    dst.put_u8(config.deadband);
    dst.put_u8(config.yaw_deadband);
    dst.put_u8(config.alt_hold_deadband);
    if ctx.version.at_least(1, 17) {
        dst.put_u16_le(config.deadband3d_throttle);
    }
    Ok(())
}

fn decode_failsafe(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut failsafe = FailsafeConfig {
        delay: r.u8()?,
        off_delay: r.u8()?,
        throttle: r.u16()?,
        ..Default::default()
    };
    if version.at_least(1, 15) {
        failsafe.switch_mode = r.u8()?;
        failsafe.throttle_low_delay = r.u16()?;
        failsafe.procedure = r.u8()?;
    }
    state.failsafe = failsafe;
    Ok(())
}

fn encode_failsafe(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let failsafe = &state.failsafe;
    dst.put_u8(failsafe.delay);
    dst.put_u8(failsafe.off_delay);
    dst.put_u16_le(failsafe.throttle);
    if ctx.version.at_least(1, 15) {
        dst.put_u8(failsafe.switch_mode);
        dst.put_u16_le(failsafe.throttle_low_delay);
        dst.put_u8(failsafe.procedure);
    }
    Ok(())
}

fn decode_rxfail(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let count = r.records(3);
    let mut channels = Vec::with_capacity(count);
    for _ in 0..count {
        channels.push(RxFailChannel {
            mode: r.u8()?,
            value: r.u16()?,
        });
    }
    state.rxfail = channels;
    Ok(())
}

fn encode_rxfail(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let channel = ctx.item(codes::SET_RXFAIL_CONFIG, &state.rxfail)?;
    dst.put_u8(ctx.wire_index(codes::SET_RXFAIL_CONFIG)?);
    dst.put_u8(channel.mode);
    dst.put_u16_le(channel.value);
    Ok(())
}

fn decode_mode_ranges(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let count = r.records(4);
    let mut ranges = Vec::with_capacity(count);
    for _ in 0..count {
        ranges.push(ModeRange {
            id: r.u8()?,
            aux_channel: r.u8()?,
            start: range_value(r.u8()?),
            end: range_value(r.u8()?),
        });
    }
    state.mode_ranges = ranges;
    Ok(())
}

fn encode_mode_range(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let range = ctx.item(codes::SET_MODE_RANGE, &state.mode_ranges)?;
    dst.put_u8(ctx.wire_index(codes::SET_MODE_RANGE)?);
    dst.put_u8(range.id);
    dst.put_u8(range.aux_channel);
    dst.put_u8(range_step(range.start));
    dst.put_u8(range_step(range.end));
    if ctx.version.at_least(1, 41) {
        let extra = state
            .mode_ranges_extra
            .get(ctx.index)
            .cloned()
            .unwrap_or_default();
        dst.put_u8(extra.mode_logic);
        dst.put_u8(extra.linked_to);
    }
    Ok(())
}

fn decode_mode_ranges_extra(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let count = r.u8()?;
    let mut extras = Vec::with_capacity(count as usize);
    for _ in 0..count {
        extras.push(ModeRangeExtra {
            id: r.u8()?,
            mode_logic: r.u8()?,
            linked_to: r.u8()?,
        });
    }
    state.mode_ranges_extra = extras;
    Ok(())
}

fn decode_adjustment_ranges(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let count = r.records(6);
    let mut ranges = Vec::with_capacity(count);
    for _ in 0..count {
        ranges.push(AdjustmentRange {
            slot_index: r.u8()?,
            aux_channel: r.u8()?,
            start: range_value(r.u8()?),
            end: range_value(r.u8()?),
            adjustment_function: r.u8()?,
            aux_switch_channel: r.u8()?,
        });
    }
    state.adjustment_ranges = ranges;
    Ok(())
}

fn encode_adjustment_range(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let range = ctx.item(codes::SET_ADJUSTMENT_RANGE, &state.adjustment_ranges)?;
    dst.put_u8(ctx.wire_index(codes::SET_ADJUSTMENT_RANGE)?);
    dst.put_u8(range.slot_index);
    dst.put_u8(range.aux_channel);
    dst.put_u8(range_step(range.start));
    dst.put_u8(range_step(range.end));
    dst.put_u8(range.adjustment_function);
    dst.put_u8(range.aux_switch_channel);
    Ok(())
}
