//! Live sensor, output and battery telemetry

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::core::{ApiVersion, Result};
use crate::protocol::message as codes;
use super::buffer::PayloadReader;
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

/// Motor outputs carried by a motor override
pub const MOTOR_COUNT: usize = 8;

// raw counts per unit
const ACC_DIVISOR: f64 = 512.0;
const GYRO_DIVISOR: f64 = 16.4 / 4.0;
const MAG_DIVISOR: f64 = 1090.0;

/// Scaled raw IMU readings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Imu {
    /// g
    pub accelerometer: [f64; 3],
    /// deg/s
    pub gyroscope: [f64; 3],
    /// gauss
    pub magnetometer: [f64; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attitude {
    /// degrees
    pub roll: f64,
    /// degrees
    pub pitch: f64,
    pub heading: i16,
    /// metres
    pub altitude: f64,
    /// centimetres, raw
    pub sonar: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpsSatellite {
    pub channel: u8,
    pub sv_id: u8,
    pub quality: u8,
    pub cno: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpsData {
    pub fix: bool,
    pub num_sat: u8,
    /// degrees * 1e7
    pub latitude: i32,
    /// degrees * 1e7
    pub longitude: i32,
    pub altitude: u16,
    pub speed: u16,
    pub ground_course: u16,
    pub distance_to_home: u16,
    pub direction_to_home: u16,
    pub update: u8,
    pub satellites: Vec<GpsSatellite>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analog {
    /// volts
    pub voltage: f64,
    pub mah_drawn: u16,
    pub rssi: u16,
    /// amps
    pub amperage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatteryState {
    pub cell_count: u8,
    pub capacity: u16,
    /// volts
    pub voltage: f64,
    pub mah_drawn: u16,
    /// amps
    pub amperage: f64,
    pub battery_state: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VoltageMeter {
    pub id: u8,
    /// volts
    pub voltage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurrentMeter {
    pub id: u8,
    pub mah_drawn: u16,
    /// amps
    pub amperage: f64,
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::RAW_IMU, decode_raw_imu)
        .decoder(codes::SERVO, |state, _, r| {
            state.servo_outputs = read_channels(r)?;
            Ok(())
        })
        .decoder(codes::MOTOR, |state, _, r| {
            state.motor_outputs = read_channels(r)?;
            Ok(())
        })
        .decoder(codes::RC, |state, _, r| {
            state.rc_channels = read_channels(r)?;
            Ok(())
        })
        .decoder(codes::RAW_GPS, decode_raw_gps)
        .decoder(codes::COMP_GPS, decode_comp_gps)
        .decoder(codes::GPS_SV_INFO, decode_gps_sv_info)
        .decoder(codes::ATTITUDE, decode_attitude)
        .decoder(codes::ALTITUDE, |state, _, r| {
            state.attitude.altitude = r.i32()? as f64 / 100.0;
            Ok(())
        })
        .decoder(codes::SONAR, |state, _, r| {
            state.attitude.sonar = r.i32()?;
            Ok(())
        })
        .decoder(codes::ANALOG, decode_analog)
        .decoder(codes::VOLTAGE_METERS, decode_voltage_meters)
        .decoder(codes::CURRENT_METERS, decode_current_meters)
        .decoder(codes::BATTERY_STATE, decode_battery_state)
        .decoder(codes::DEBUG, |state, _, r| {
            let values = [r.i16()?, r.i16()?, r.i16()?, r.i16()?];
            state.debug_values = values;
            Ok(())
        })
        .encoder(codes::SET_MOTOR, encode_motor)
        .ack(codes::SET_MOTOR, "Motor override applied")
        .encoder(codes::SET_RAW_RC, encode_raw_rc)
        .ack(codes::SET_RAW_RC, "RC override applied");
}

fn read_channels(r: &mut PayloadReader<'_>) -> Result<Vec<u16>> {
    let count = r.records(2);
    (0..count).map(|_| r.u16()).collect()
}

fn read_axes(r: &mut PayloadReader<'_>, divisor: f64) -> Result<[f64; 3]> {
    Ok([
        r.i16()? as f64 / divisor,
        r.i16()? as f64 / divisor,
        r.i16()? as f64 / divisor,
    ])
}

fn decode_raw_imu(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let imu = Imu {
        accelerometer: read_axes(r, ACC_DIVISOR)?,
        gyroscope: read_axes(r, GYRO_DIVISOR)?,
        magnetometer: read_axes(r, MAG_DIVISOR)?,
    };
    state.imu = imu;
    Ok(())
}

fn decode_raw_gps(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let fix = r.u8()? != 0;
    let num_sat = r.u8()?;
    let latitude = r.i32()?;
    let longitude = r.i32()?;
    let altitude = r.u16()?;
    let speed = r.u16()?;
    let ground_course = r.u16()?;

    let gps = &mut state.gps;
    gps.fix = fix;
    gps.num_sat = num_sat;
    gps.latitude = latitude;
    gps.longitude = longitude;
    gps.altitude = altitude;
    gps.speed = speed;
    gps.ground_course = ground_course;
    Ok(())
}

fn decode_comp_gps(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let distance = r.u16()?;
    let direction = r.u16()?;
    let update = r.u8()?;
    state.gps.distance_to_home = distance;
    state.gps.direction_to_home = direction;
    state.gps.update = update;
    Ok(())
}

fn decode_gps_sv_info(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let count = r.u8()? as usize;
    let mut satellites = Vec::with_capacity(count);
    for _ in 0..count {
        satellites.push(GpsSatellite {
            channel: r.u8()?,
            sv_id: r.u8()?,
            quality: r.u8()?,
            cno: r.u8()?,
        });
    }
    state.gps.satellites = satellites;
    Ok(())
}

fn decode_attitude(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let roll = r.i16()? as f64 / 10.0;
    let pitch = r.i16()? as f64 / 10.0;
    let heading = r.i16()?;
    state.attitude.roll = roll;
    state.attitude.pitch = pitch;
    state.attitude.heading = heading;
    Ok(())
}

fn decode_analog(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut voltage = r.u8()? as f64 / 10.0;
    let mah_drawn = r.u16()?;
    let rssi = r.u16()?;
    let amperage = r.i16()? as f64 / 100.0;
    if version.at_least(1, 41) {
        voltage = r.u16()? as f64 / 100.0;
    }
    state.analog = Analog {
        voltage,
        mah_drawn,
        rssi,
        amperage,
    };
    Ok(())
}

fn decode_voltage_meters(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let count = r.records(2);
    let mut meters = Vec::with_capacity(count);
    for _ in 0..count {
        meters.push(VoltageMeter {
            id: r.u8()?,
            voltage: r.u8()? as f64 / 10.0,
        });
    }
    state.voltage_meters = meters;
    Ok(())
}

fn decode_current_meters(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let count = r.records(5);
    let mut meters = Vec::with_capacity(count);
    for _ in 0..count {
        meters.push(CurrentMeter {
            id: r.u8()?,
            mah_drawn: r.u16()?,
            amperage: r.u16()? as f64 / 1000.0,
        });
    }
    state.current_meters = meters;
    Ok(())
}

fn decode_battery_state(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut battery = BatteryState {
        cell_count: r.u8()?,
        capacity: r.u16()?,
        voltage: r.u8()? as f64 / 10.0,
        mah_drawn: r.u16()?,
        amperage: r.u16()? as f64 / 100.0,
        battery_state: 0,
    };
    if version.at_least(1, 41) {
        battery.battery_state = r.u8()?;
        battery.voltage = r.u16()? as f64 / 100.0;
    }
    state.battery_state = battery;
    Ok(())
}

fn encode_motor(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    for i in 0..MOTOR_COUNT {
        dst.put_u16_le(state.motor_outputs.get(i).copied().unwrap_or(0));
    }
    Ok(())
}

fn encode_raw_rc(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    for &channel in &state.rc_channels {
        dst.put_u16_le(channel);
    }
    Ok(())
}
