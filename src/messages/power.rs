//! Battery and power meter configuration

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::core::{ApiVersion, Result};
use crate::protocol::message as codes;
use super::buffer::{scaled_u16, scaled_u8, PayloadReader};
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

const VOLTAGE_METER_SUBFRAME: usize = 5;
const CURRENT_METER_SUBFRAME: usize = 6;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatteryConfig {
    /// volts per cell
    pub vbat_min_cell: f64,
    pub vbat_max_cell: f64,
    pub vbat_warning_cell: f64,
    pub capacity: u16,
    pub voltage_meter_source: u8,
    pub current_meter_source: u8,
}

/// Single voltage meter configuration used before API 1.36
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegacyVoltageMeterConfig {
    pub scale: u8,
    pub min_cell: f64,
    pub max_cell: f64,
    pub warning_cell: f64,
    pub meter_type: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VoltageMeterConfig {
    pub id: u8,
    pub sensor_type: u8,
    pub scale: u8,
    pub divider_value: u8,
    pub divider_multiplier: u8,
}

/// Single current meter configuration used before API 1.36
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegacyCurrentMeterConfig {
    pub scale: i16,
    pub offset: i16,
    pub meter_type: u8,
    pub capacity: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurrentMeterConfig {
    pub id: u8,
    pub sensor_type: u8,
    pub scale: i16,
    pub offset: i16,
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::BATTERY_CONFIG, decode_battery_config)
        .encoder(codes::SET_BATTERY_CONFIG, encode_battery_config)
        .ack(codes::SET_BATTERY_CONFIG, "Battery configuration saved")
        .decoder(codes::VOLTAGE_METER_CONFIG, decode_voltage_meter_config)
        .encoder(codes::SET_VOLTAGE_METER_CONFIG, encode_voltage_meter_config)
        .ack(codes::SET_VOLTAGE_METER_CONFIG, "Voltage meter configuration saved")
        .decoder(codes::CURRENT_METER_CONFIG, decode_current_meter_config)
        .encoder(codes::SET_CURRENT_METER_CONFIG, encode_current_meter_config)
        .ack(codes::SET_CURRENT_METER_CONFIG, "Current meter configuration saved");
}

fn decode_battery_config(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut config = BatteryConfig {
        vbat_min_cell: r.u8()? as f64 / 10.0,
        vbat_max_cell: r.u8()? as f64 / 10.0,
        vbat_warning_cell: r.u8()? as f64 / 10.0,
        capacity: r.u16()?,
        voltage_meter_source: r.u8()?,
        current_meter_source: r.u8()?,
    };
    if version.at_least(1, 41) {
        config.vbat_min_cell = r.u16()? as f64 / 100.0;
        config.vbat_max_cell = r.u16()? as f64 / 100.0;
        config.vbat_warning_cell = r.u16()? as f64 / 100.0;
    }
    state.battery_config = config;
    Ok(())
}

fn encode_battery_config(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let config = &state.battery_config;
    dst.put_u8(scaled_u8(config.vbat_min_cell, 10.0));
    dst.put_u8(scaled_u8(config.vbat_max_cell, 10.0));
    dst.put_u8(scaled_u8(config.vbat_warning_cell, 10.0));
    dst.put_u16_le(config.capacity);
    dst.put_u8(config.voltage_meter_source);
    dst.put_u8(config.current_meter_source);
    if ctx.version.at_least(1, 41) {
        dst.put_u16_le(scaled_u16(config.vbat_min_cell, 100.0));
        dst.put_u16_le(scaled_u16(config.vbat_max_cell, 100.0));
        dst.put_u16_le(scaled_u16(config.vbat_warning_cell, 100.0));
    }
    Ok(())
}

fn decode_voltage_meter_config(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    if !version.at_least(1, 36) {
        let mut legacy = LegacyVoltageMeterConfig {
            scale: r.u8()?,
            min_cell: r.u8()? as f64 / 10.0,
            max_cell: r.u8()? as f64 / 10.0,
            warning_cell: r.u8()? as f64 / 10.0,
            meter_type: 0,
        };
        if version.at_least(1, 23) {
            legacy.meter_type = r.u8()?;
        }
        state.legacy_voltage_meter = legacy;
        return Ok(());
    }

    let count = r.u8()?;
    let mut configs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let subframe = r.u8()? as usize;
        if subframe != VOLTAGE_METER_SUBFRAME {
            r.skip(subframe)?;
            continue;
        }
        configs.push(VoltageMeterConfig {
            id: r.u8()?,
            sensor_type: r.u8()?,
            scale: r.u8()?,
            divider_value: r.u8()?,
            divider_multiplier: r.u8()?,
        });
    }
    state.voltage_meter_configs = configs;
    Ok(())
}

fn encode_voltage_meter_config(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    if !ctx.version.at_least(1, 36) {
        let legacy = &state.legacy_voltage_meter;
        dst.put_u8(legacy.scale);
        dst.put_u8(scaled_u8(legacy.min_cell, 10.0));
        dst.put_u8(scaled_u8(legacy.max_cell, 10.0));
        dst.put_u8(scaled_u8(legacy.warning_cell, 10.0));
        if ctx.version.at_least(1, 23) {
            dst.put_u8(legacy.meter_type);
        }
        return Ok(());
    }

    let meter = ctx.item(codes::SET_VOLTAGE_METER_CONFIG, &state.voltage_meter_configs)?;
    dst.put_u8(meter.id);
    dst.put_u8(meter.scale);
    dst.put_u8(meter.divider_value);
    dst.put_u8(meter.divider_multiplier);
    Ok(())
}

fn decode_current_meter_config(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    if !version.at_least(1, 36) {
        let legacy = LegacyCurrentMeterConfig {
            scale: r.i16()?,
            offset: r.i16()?,
            meter_type: r.u8()?,
            capacity: r.u16()?,
        };
        state.legacy_current_meter = legacy;
        return Ok(());
    }

    let count = r.u8()?;
    let mut configs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let subframe = r.u8()? as usize;
        if subframe != CURRENT_METER_SUBFRAME {
            r.skip(subframe)?;
            continue;
        }
        configs.push(CurrentMeterConfig {
            id: r.u8()?,
            sensor_type: r.u8()?,
            scale: r.i16()?,
            offset: r.i16()?,
        });
    }
    state.current_meter_configs = configs;
    Ok(())
}

fn encode_current_meter_config(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    if !ctx.version.at_least(1, 36) {
        let legacy = &state.legacy_current_meter;
        dst.put_i16_le(legacy.scale);
        dst.put_i16_le(legacy.offset);
        dst.put_u8(legacy.meter_type);
        dst.put_u16_le(legacy.capacity);
        return Ok(());
    }

    let meter = ctx.item(codes::SET_CURRENT_METER_CONFIG, &state.current_meter_configs)?;
    dst.put_u8(meter.id);
    dst.put_i16_le(meter.scale);
    dst.put_i16_le(meter.offset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;
    use crate::messages::testing::{decode, encode_indexed, roundtrip};

    #[test]
    fn test_battery_config_roundtrip_by_version() {
        let mut state = DeviceState::default();
        state.battery_config = BatteryConfig {
            vbat_min_cell: 3.3,
            vbat_max_cell: 4.3,
            vbat_warning_cell: 3.5,
            capacity: 1300,
            voltage_meter_source: 1,
            current_meter_source: 2,
        };

        let (bytes, decoded) = roundtrip(codes::BATTERY_CONFIG, codes::SET_BATTERY_CONFIG, &state, ApiVersion::new(1, 40, 0));
        assert_eq!(bytes.len(), 7);
        assert_eq!(decoded.battery_config, state.battery_config);

        let (bytes, decoded) = roundtrip(codes::BATTERY_CONFIG, codes::SET_BATTERY_CONFIG, &state, ApiVersion::new(1, 41, 0));
        assert_eq!(bytes.len(), 13);
        assert_eq!(decoded.battery_config, state.battery_config);
    }

    #[test]
    fn test_voltage_meter_subframes() {
        // second subframe has an unknown length and is skipped
        let payload = [3, 5, 10, 0, 110, 10, 1, 3, 9, 9, 9, 5, 50, 1, 120, 11, 2];
        let state = decode(codes::VOLTAGE_METER_CONFIG, ApiVersion::new(1, 36, 0), &payload);
        assert_eq!(state.voltage_meter_configs.len(), 2);
        assert_eq!(state.voltage_meter_configs[0].scale, 110);
        assert_eq!(state.voltage_meter_configs[1].id, 50);
        assert_eq!(state.voltage_meter_configs[1].divider_multiplier, 2);
    }

    #[test]
    fn test_legacy_voltage_meter() {
        let state = decode(codes::VOLTAGE_METER_CONFIG, ApiVersion::new(1, 31, 0), &[110, 33, 43, 35, 1]);
        let legacy = &state.legacy_voltage_meter;
        assert_eq!(legacy.scale, 110);
        assert_eq!(legacy.max_cell, 4.3);
        assert_eq!(legacy.meter_type, 1);

        let bytes = encode_indexed(codes::SET_VOLTAGE_METER_CONFIG, &state, ApiVersion::new(1, 22, 0), 0);
        assert_eq!(bytes, vec![110, 33, 43, 35]);
    }

    #[test]
    fn test_indexed_meter_uploads() {
        let mut state = DeviceState::default();
        state.current_meter_configs = vec![
            CurrentMeterConfig { id: 10, sensor_type: 1, scale: 400, offset: 0 },
            CurrentMeterConfig { id: 50, sensor_type: 2, scale: -120, offset: 5 },
        ];
        let bytes = encode_indexed(codes::SET_CURRENT_METER_CONFIG, &state, ApiVersion::new(1, 41, 0), 1);
        assert_eq!(bytes, vec![50, 0x88, 0xFF, 5, 0]);

        let err = Registry::standard()
            .encode(
                codes::SET_CURRENT_METER_CONFIG,
                &state,
                &EncodeContext::new(ApiVersion::new(1, 41, 0)).with_index(2),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_current_meter_subframes() {
        let payload = [1, 6, 10, 1, 0x90, 0x01, 0xFB, 0xFF];
        let state = decode(codes::CURRENT_METER_CONFIG, ApiVersion::new(1, 41, 0), &payload);
        assert_eq!(
            state.current_meter_configs,
            vec![CurrentMeterConfig { id: 10, sensor_type: 1, scale: 400, offset: -5 }]
        );
    }
}
