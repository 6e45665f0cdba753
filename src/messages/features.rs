//! Feature and beeper masks

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::core::{ApiVersion, Result};
use crate::protocol::message as codes;
use crate::util::{bit_check, bit_clear, bit_set, mask_from_names, names_from_mask};
use super::buffer::PayloadReader;
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

/// Feature bits of current firmware
pub const FEATURES: &[(&str, u32)] = &[
    ("RX_PPM", 0),
    ("INFLIGHT_ACC_CAL", 2),
    ("RX_SERIAL", 3),
    ("MOTOR_STOP", 4),
    ("SERVO_TILT", 5),
    ("SOFTSERIAL", 6),
    ("GPS", 7),
    ("RANGEFINDER", 9),
    ("TELEMETRY", 10),
    ("3D", 12),
    ("RX_PARALLEL_PWM", 13),
    ("RX_MSP", 14),
    ("RSSI_ADC", 15),
    ("LED_STRIP", 16),
    ("DISPLAY", 17),
    ("OSD", 18),
    ("CHANNEL_FORWARDING", 20),
    ("TRANSPONDER", 21),
    ("AIRMODE", 22),
    ("RX_SPI", 25),
    ("SOFTSPI", 26),
    ("ESC_SENSOR", 27),
    ("ANTI_GRAVITY", 28),
    ("DYNAMIC_FILTER", 29),
];

/// Beeper conditions. A set bit silences the condition.
pub const BEEPER_CONDITIONS: &[(&str, u32)] = &[
    ("GYRO_CALIBRATED", 0),
    ("RX_LOST", 1),
    ("RX_LOST_LANDING", 2),
    ("DISARMING", 3),
    ("ARMING", 4),
    ("ARMING_GPS_FIX", 5),
    ("BAT_CRIT_LOW", 6),
    ("BAT_LOW", 7),
    ("GPS_STATUS", 8),
    ("RX_SET", 9),
    ("ACC_CALIBRATION", 10),
    ("ACC_CALIBRATION_FAIL", 11),
    ("READY_BEEP", 12),
    ("MULTI_BEEPS", 13),
    ("DISARM_REPEAT", 14),
    ("ARMED", 15),
    ("SYSTEM_INIT", 16),
    ("USB", 17),
    ("BLACKBOX_ERASE", 18),
    ("CRASH_FLIP", 19),
    ("CAM_CONNECTION_OPEN", 20),
    ("CAM_CONNECTION_CLOSE", 21),
    ("RC_SMOOTHING_INIT_FAIL", 22),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureConfig {
    pub mask: u32,
}

impl FeatureConfig {
    pub fn is_enabled(&self, name: &str) -> bool {
        FEATURES
            .iter()
            .find(|(known, _)| *known == name)
            .map_or(false, |(_, bit)| bit_check(self.mask, *bit))
    }

    /// Sets or clears a named feature; returns false for unknown names
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let bit = match FEATURES.iter().find(|(known, _)| *known == name) {
            Some((_, bit)) => *bit,
            None => return false,
        };
        self.mask = if enabled {
            bit_set(self.mask, bit)
        } else {
            bit_clear(self.mask, bit)
        };
        true
    }

    pub fn enabled(&self) -> Vec<&'static str> {
        names_from_mask(FEATURES, self.mask)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BeeperConfig {
    /// Conditions that do not beep
    pub disabled_mask: u32,
    pub dshot_beacon_tone: u8,
    pub dshot_beacon_conditions: u32,
}

impl BeeperConfig {
    pub fn silenced(&self) -> Vec<&'static str> {
        names_from_mask(BEEPER_CONDITIONS, self.disabled_mask)
    }

    pub fn silence<S: AsRef<str>>(&mut self, conditions: &[S]) {
        self.disabled_mask = mask_from_names(BEEPER_CONDITIONS, conditions);
    }
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::FEATURE_CONFIG, |state, _, r| {
            state.features.mask = r.u32()?;
            Ok(())
        })
        .encoder(codes::SET_FEATURE_CONFIG, |state, _, dst| {
            dst.put_u32_le(state.features.mask);
            Ok(())
        })
        .ack(codes::SET_FEATURE_CONFIG, "Features saved")
        .decoder(codes::BEEPER_CONFIG, decode_beeper)
        .encoder(codes::SET_BEEPER_CONFIG, encode_beeper)
        .ack(codes::SET_BEEPER_CONFIG, "Beeper configuration saved");
}

fn decode_beeper(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut config = BeeperConfig {
        disabled_mask: r.u32()?,
        ..state.beeper.clone()
    };
    if version.at_least(1, 37) {
        config.dshot_beacon_tone = r.u8()?;
    }
    if version.at_least(1, 39) {
        config.dshot_beacon_conditions = r.u32()?;
    }
    state.beeper = config;
    Ok(())
}

fn encode_beeper(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let config = &state.beeper;
    dst.put_u32_le(config.disabled_mask);
    if ctx.version.at_least(1, 37) {
        dst.put_u8(config.dshot_beacon_tone);
    }
    if ctx.version.at_least(1, 39) {
        dst.put_u32_le(config.dshot_beacon_conditions);
    }
    Ok(())
}
