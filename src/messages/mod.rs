//! Versioned message codec
//!
//! Each message family lives in its own module and registers plain
//! encode/decode functions for its codes with the [`Registry`]. Every
//! function receives the negotiated [`ApiVersion`](crate::core::ApiVersion)
//! and gates field presence and scaling on it.

pub mod batch;
pub mod buffer;
pub mod features;
pub mod led;
pub mod motor;
pub mod power;
pub mod registry;
pub mod rx;
pub mod sensors;
pub mod serial;
pub mod storage;
pub mod system;
pub mod telemetry;
pub mod tuning;

use serde::Serialize;

use crate::core::ApiVersion;

pub use self::buffer::PayloadReader;
pub use self::registry::{DecodeFn, EncodeContext, EncodeFn, MessageUnit, Registry};

/// Decoded configuration and telemetry of one flight controller.
///
/// Owned by the engine; callers receive snapshots and pass modified copies
/// back only as input to an encode.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceState {
    pub api_version: ApiVersion,
    pub identity: system::Identity,
    pub status: system::Status,
    pub arming_control: system::ArmingControl,
    pub reboot: system::Reboot,
    pub copy_profile: system::CopyProfile,
    pub selected_profile: u8,

    pub imu: telemetry::Imu,
    pub attitude: telemetry::Attitude,
    pub gps: telemetry::GpsData,
    pub analog: telemetry::Analog,
    pub battery_state: telemetry::BatteryState,
    pub voltage_meters: Vec<telemetry::VoltageMeter>,
    pub current_meters: Vec<telemetry::CurrentMeter>,
    pub servo_outputs: Vec<u16>,
    pub motor_outputs: Vec<u16>,
    pub rc_channels: Vec<u16>,
    pub debug_values: [i16; 4],

    pub battery_config: power::BatteryConfig,
    pub legacy_voltage_meter: power::LegacyVoltageMeterConfig,
    pub voltage_meter_configs: Vec<power::VoltageMeterConfig>,
    pub legacy_current_meter: power::LegacyCurrentMeterConfig,
    pub current_meter_configs: Vec<power::CurrentMeterConfig>,

    pub rx_config: rx::RxConfig,
    pub rx_map: Vec<u8>,
    pub rc_tuning: rx::RcTuning,
    pub rc_deadband: rx::RcDeadband,
    pub failsafe: rx::FailsafeConfig,
    pub rxfail: Vec<rx::RxFailChannel>,
    pub rssi_channel: u8,
    pub mode_ranges: Vec<rx::ModeRange>,
    pub mode_ranges_extra: Vec<rx::ModeRangeExtra>,
    pub adjustment_ranges: Vec<rx::AdjustmentRange>,
    pub box_names: Vec<String>,
    pub pid_names: Vec<String>,
    pub box_ids: Vec<u8>,

    pub motor_config: motor::MotorConfig,
    pub motor_3d: motor::Motor3dConfig,
    pub mixer: motor::MixerConfig,
    pub advanced: motor::AdvancedConfig,
    pub servo_configs: Vec<motor::ServoConfig>,
    pub arming: motor::ArmingConfig,
    pub misc: motor::MiscConfig,

    pub pids: Vec<[u8; 3]>,
    pub pid_advanced: tuning::PidAdvanced,
    pub filters: tuning::FilterConfig,
    pub pid_controller: u8,
    pub loop_time: u16,

    pub sensor_alignment: sensors::SensorAlignment,
    pub sensor_config: sensors::SensorConfig,
    pub board_alignment: sensors::BoardAlignment,
    pub acc_trim: [i16; 2],
    pub mag_declination: f64,
    pub gps_config: sensors::GpsConfig,
    pub gps_rescue: sensors::GpsRescue,

    pub serial: serial::SerialConfig,

    pub led_strip: Vec<led::Led>,
    pub led_profile: led::LedProfileSupport,
    pub led_colors: Vec<led::LedColor>,
    pub led_mode_colors: Vec<led::LedModeColor>,

    pub dataflash: storage::DataflashSummary,
    pub sdcard: storage::SdcardSummary,
    pub blackbox: storage::BlackboxConfig,
    pub transponder: storage::TransponderConfig,

    pub features: features::FeatureConfig,
    pub beeper: features::BeeperConfig,
}

impl DeviceState {
    /// Creates an empty state for a controller speaking `version`
    pub fn new(version: ApiVersion) -> Self {
        DeviceState {
            api_version: version,
            ..Default::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Encodes `set_code` from `state` and decodes the bytes as `read_code` into a fresh state
    pub fn roundtrip(read_code: u16, set_code: u16, state: &DeviceState, version: ApiVersion) -> (Vec<u8>, DeviceState) {
        let registry = Registry::standard();
        let payload = registry
            .encode(set_code, state, &EncodeContext::new(version))
            .unwrap();
        let mut decoded = DeviceState::new(version);
        assert!(registry.decode(read_code, &mut decoded, version, &payload).unwrap());
        (payload.to_vec(), decoded)
    }

    /// Decodes a raw payload into a fresh state
    pub fn decode(code: u16, version: ApiVersion, payload: &[u8]) -> DeviceState {
        let mut state = DeviceState::new(version);
        assert!(Registry::standard().decode(code, &mut state, version, payload).unwrap());
        state
    }

    /// Encodes `code` with an explicit index
    pub fn encode_indexed(code: u16, state: &DeviceState, version: ApiVersion, index: usize) -> Vec<u8> {
        Registry::standard()
            .encode(code, state, &EncodeContext::new(version).with_index(index))
            .unwrap()
            .to_vec()
    }
}
