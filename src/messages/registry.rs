//! Code to encode/decode unit lookup

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::{ApiVersion, Error, Result};
use crate::protocol::message;
use super::buffer::PayloadReader;
use super::DeviceState;

/// Inputs an encoder may depend on besides the device state
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext {
    pub version: ApiVersion,
    /// Item index for messages that upload one element of a list
    pub index: usize,
    /// Wall clock, used by the clock-setting message
    pub now: DateTime<Utc>,
}

impl EncodeContext {
    /// Creates a context for the given version at the current time
    pub fn new(version: ApiVersion) -> Self {
        EncodeContext {
            version,
            index: 0,
            now: Utc::now(),
        }
    }

    /// Selects the list element to encode
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Overrides the wall clock
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Index as the single byte the upload messages carry
    pub fn wire_index(&self, code: u16) -> Result<u8> {
        u8::try_from(self.index).map_err(|_| {
            Error::invalid_argument(format!(
                "{} index {} does not fit in a byte",
                message::describe(code),
                self.index
            ))
        })
    }

    /// Element of `items` selected by the index
    pub fn item<'a, T>(&self, code: u16, items: &'a [T]) -> Result<&'a T> {
        items.get(self.index).ok_or_else(|| {
            Error::invalid_argument(format!(
                "{} has no element {} (list holds {})",
                message::describe(code),
                self.index,
                items.len()
            ))
        })
    }
}

/// Serializes part of the device state into a request payload
pub type EncodeFn = fn(&DeviceState, &EncodeContext, &mut BytesMut) -> Result<()>;

/// Applies a response payload to the device state.
///
/// Decoders read every field before writing any, so a short payload leaves
/// the state untouched.
pub type DecodeFn = fn(&mut DeviceState, ApiVersion, &mut PayloadReader<'_>) -> Result<()>;

/// Handlers registered for one code
#[derive(Clone, Copy, Default)]
pub struct MessageUnit {
    pub encode: Option<EncodeFn>,
    pub decode: Option<DecodeFn>,
    /// Log line for write acknowledgements that carry no data
    pub ack: Option<&'static str>,
}

/// Map from message code to its codec unit
#[derive(Clone, Default)]
pub struct Registry {
    units: HashMap<u16, MessageUnit>,
}

impl Registry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registry holding every message family the engine understands
    pub fn standard() -> Self {
        let mut registry = Registry::new();
        super::system::register(&mut registry);
        super::telemetry::register(&mut registry);
        super::power::register(&mut registry);
        super::rx::register(&mut registry);
        super::motor::register(&mut registry);
        super::tuning::register(&mut registry);
        super::sensors::register(&mut registry);
        super::serial::register(&mut registry);
        super::led::register(&mut registry);
        super::storage::register(&mut registry);
        super::features::register(&mut registry);
        registry
    }

    /// Process-wide standard registry
    pub fn shared() -> Arc<Registry> {
        static SHARED: OnceLock<Arc<Registry>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Registry::standard())).clone()
    }

    fn unit(&mut self, code: u16) -> &mut MessageUnit {
        self.units.entry(code).or_default()
    }

    /// Registers the encoder for a request code
    pub fn encoder(&mut self, code: u16, f: EncodeFn) -> &mut Self {
        self.unit(code).encode = Some(f);
        self
    }

    /// Registers the decoder for a response code
    pub fn decoder(&mut self, code: u16, f: DecodeFn) -> &mut Self {
        self.unit(code).decode = Some(f);
        self
    }

    /// Registers a write whose response carries nothing
    pub fn ack(&mut self, code: u16, text: &'static str) -> &mut Self {
        self.unit(code).ack = Some(text);
        self
    }

    /// Returns the unit for `code`, if any
    pub fn get(&self, code: u16) -> Option<&MessageUnit> {
        self.units.get(&code)
    }

    pub fn can_encode(&self, code: u16) -> bool {
        self.get(code).map_or(false, |u| u.encode.is_some())
    }

    pub fn can_decode(&self, code: u16) -> bool {
        self.get(code).map_or(false, |u| u.decode.is_some() || u.ack.is_some())
    }

    /// Number of registered codes
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Encodes the request payload for `code`
    pub fn encode(&self, code: u16, state: &DeviceState, ctx: &EncodeContext) -> Result<Bytes> {
        let f = self
            .get(code)
            .and_then(|u| u.encode)
            .ok_or(Error::NotEncodable { code })?;
        let mut dst = BytesMut::new();
        f(state, ctx, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Applies a response payload to `state`.
    ///
    /// Returns `Ok(false)` when nothing is registered for the code and
    /// `NotDecodable` when the code only has an encoder. Bytes left over after
    /// the known layout belong to fields newer than this codec and are ignored.
    pub fn decode(&self, code: u16, state: &mut DeviceState, version: ApiVersion, payload: &[u8]) -> Result<bool> {
        let unit = match self.get(code) {
            Some(unit) => unit,
            None => return Ok(false),
        };
        if let Some(f) = unit.decode {
            let mut reader = PayloadReader::new(code, payload);
            f(state, version, &mut reader)?;
            if reader.remaining() > 0 {
                debug!(
                    code,
                    trailing = reader.remaining(),
                    "Ignoring trailing bytes in {}",
                    message::describe(code)
                );
            }
            return Ok(true);
        }
        if let Some(text) = unit.ack {
            debug!(code, "{}", text);
            return Ok(true);
        }
        Err(Error::NotDecodable { code })
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("codes", &self.units.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message as codes;

    #[test]
    fn test_standard_covers_families() {
        let registry = Registry::standard();
        assert!(registry.len() > 100);
        for code in [codes::API_VERSION, codes::STATUS_EX, codes::BATTERY_CONFIG, codes::LED_STRIP_CONFIG] {
            assert!(registry.can_decode(code), "{}", codes::describe(code));
        }
        for code in [codes::SET_BATTERY_CONFIG, codes::SET_RTC, codes::SET_LED_STRIP_CONFIG] {
            assert!(registry.can_encode(code), "{}", codes::describe(code));
        }
    }

    #[test]
    fn test_wire_index_fits_a_byte() {
        let ctx = EncodeContext::new(ApiVersion::new(1, 41, 0));
        assert_eq!(ctx.with_index(255).wire_index(codes::SET_MODE_RANGE).unwrap(), 255);
        assert!(matches!(
            ctx.with_index(300).wire_index(codes::SET_MODE_RANGE),
            Err(Error::InvalidArgument(_))
        ));
    }

    const VERSION_LADDER: &[(u8, u8)] = &[
        (1, 5), (1, 7), (1, 8), (1, 10), (1, 12), (1, 15), (1, 16), (1, 17), (1, 18), (1, 20),
        (1, 21), (1, 23), (1, 24), (1, 25), (1, 26), (1, 31), (1, 33), (1, 34), (1, 36), (1, 37),
        (1, 39), (1, 40), (1, 41), (1, 42), (1, 44),
    ];

    fn always(_: ApiVersion) -> bool {
        true
    }

    fn before_1_36(v: ApiVersion) -> bool {
        !v.at_least(1, 36)
    }

    fn before_1_41(v: ApiVersion) -> bool {
        !v.at_least(1, 41)
    }

    fn from_1_6(v: ApiVersion) -> bool {
        v.at_least(1, 6)
    }

    /// Whole-message writes and the read they mirror, with the versions where
    /// both carry the same layout. Per-item uploads, the blackbox and
    /// transponder writes and the 1.41 sensor alignment write do not.
    const MIRRORED: &[(u16, u16, fn(ApiVersion) -> bool)] = &[
        (codes::NAME, codes::SET_NAME, always),
        (codes::BATTERY_CONFIG, codes::SET_BATTERY_CONFIG, always),
        (codes::FEATURE_CONFIG, codes::SET_FEATURE_CONFIG, always),
        (codes::BOARD_ALIGNMENT_CONFIG, codes::SET_BOARD_ALIGNMENT_CONFIG, always),
        (codes::CURRENT_METER_CONFIG, codes::SET_CURRENT_METER_CONFIG, before_1_36),
        (codes::MIXER_CONFIG, codes::SET_MIXER_CONFIG, always),
        (codes::RX_CONFIG, codes::SET_RX_CONFIG, always),
        (codes::LED_COLORS, codes::SET_LED_COLORS, always),
        (codes::RSSI_CONFIG, codes::SET_RSSI_CONFIG, always),
        (codes::CF_SERIAL_CONFIG, codes::SET_CF_SERIAL_CONFIG, from_1_6),
        (codes::VOLTAGE_METER_CONFIG, codes::SET_VOLTAGE_METER_CONFIG, before_1_36),
        (codes::PID_CONTROLLER, codes::SET_PID_CONTROLLER, always),
        (codes::ARMING_CONFIG, codes::SET_ARMING_CONFIG, always),
        (codes::RX_MAP, codes::SET_RX_MAP, always),
        (codes::LOOP_TIME, codes::SET_LOOP_TIME, always),
        (codes::FAILSAFE_CONFIG, codes::SET_FAILSAFE_CONFIG, always),
        (codes::ADVANCED_CONFIG, codes::SET_ADVANCED_CONFIG, always),
        (codes::FILTER_CONFIG, codes::SET_FILTER_CONFIG, always),
        (codes::PID_ADVANCED, codes::SET_PID_ADVANCED, always),
        (codes::SENSOR_CONFIG, codes::SET_SENSOR_CONFIG, always),
        (codes::RC, codes::SET_RAW_RC, always),
        (codes::MOTOR, codes::SET_MOTOR, always),
        (codes::RC_TUNING, codes::SET_RC_TUNING, always),
        (codes::PID, codes::SET_PID, always),
        (codes::MISC, codes::SET_MISC, always),
        (codes::MOTOR_3D_CONFIG, codes::SET_MOTOR_3D_CONFIG, always),
        (codes::RC_DEADBAND, codes::SET_RC_DEADBAND, always),
        (codes::SENSOR_ALIGNMENT, codes::SET_SENSOR_ALIGNMENT, before_1_41),
        (codes::MOTOR_CONFIG, codes::SET_MOTOR_CONFIG, always),
        (codes::GPS_CONFIG, codes::SET_GPS_CONFIG, always),
        (codes::COMPASS_CONFIG, codes::SET_COMPASS_CONFIG, always),
        (codes::GPS_RESCUE, codes::SET_GPS_RESCUE, always),
        (codes::BEEPER_CONFIG, codes::SET_BEEPER_CONFIG, always),
        (codes::ACC_TRIM, codes::SET_ACC_TRIM, always),
    ];

    #[test]
    fn test_writes_reencode_what_their_read_decodes() {
        let registry = Registry::standard();
        // printable bytes so names survive, no zeros so masks and counts are exercised
        let seed: Vec<u8> = (0..1024usize).map(|i| 33 + (i * 37 % 90) as u8).collect();

        for &(major, minor) in VERSION_LADDER {
            let version = ApiVersion::new(major, minor, 0);
            let ctx = EncodeContext::new(version);
            for &(read, set, applies) in MIRRORED {
                if !applies(version) {
                    continue;
                }
                let label = format!("{} at {}", codes::describe(set), version);

                let mut seeded = DeviceState::new(version);
                assert!(registry.decode(read, &mut seeded, version, &seed).unwrap(), "{}", label);
                let first = registry.encode(set, &seeded, &ctx).unwrap();

                let mut echoed = DeviceState::new(version);
                assert!(registry.decode(read, &mut echoed, version, &first).unwrap(), "{}", label);
                let second = registry.encode(set, &echoed, &ctx).unwrap();

                assert_eq!(first.len(), second.len(), "{}", label);
                assert_eq!(first, second, "{}", label);
            }
        }
    }

    #[test]
    fn test_mirrored_writes_have_fixed_lengths() {
        let registry = Registry::standard();
        let state = DeviceState::default();
        let cases = [
            (codes::SET_FEATURE_CONFIG, ApiVersion::new(1, 41, 0), 4),
            (codes::SET_LOOP_TIME, ApiVersion::new(1, 41, 0), 2),
            (codes::SET_MIXER_CONFIG, ApiVersion::new(1, 35, 0), 1),
            (codes::SET_MIXER_CONFIG, ApiVersion::new(1, 36, 0), 2),
            (codes::SET_MOTOR_CONFIG, ApiVersion::new(1, 41, 0), 6),
            (codes::SET_PID_CONTROLLER, ApiVersion::new(1, 41, 0), 1),
            (codes::SET_RC_DEADBAND, ApiVersion::new(1, 16, 0), 3),
            (codes::SET_RC_DEADBAND, ApiVersion::new(1, 17, 0), 5),
            (codes::SET_RSSI_CONFIG, ApiVersion::new(1, 41, 0), 1),
            (codes::SET_SENSOR_CONFIG, ApiVersion::new(1, 41, 0), 3),
            (codes::SET_ACC_TRIM, ApiVersion::new(1, 41, 0), 4),
            (codes::SET_RX_MAP, ApiVersion::new(1, 41, 0), 0),
            (codes::SET_RAW_RC, ApiVersion::new(1, 41, 0), 0),
            (codes::COPY_PROFILE, ApiVersion::new(1, 41, 0), 3),
            (codes::SELECT_SETTING, ApiVersion::new(1, 41, 0), 1),
        ];
        for (code, version, len) in cases {
            let bytes = registry.encode(code, &state, &EncodeContext::new(version)).unwrap();
            assert_eq!(bytes.len(), len, "{} at {}", codes::describe(code), version);
        }
    }

    #[test]
    fn test_profile_commands() {
        let registry = Registry::standard();
        let mut state = DeviceState::default();
        state.copy_profile.kind = 1;
        state.copy_profile.destination = 2;
        state.copy_profile.source = 0;
        state.selected_profile = 2;
        let ctx = EncodeContext::new(ApiVersion::new(1, 41, 0));
        assert_eq!(&registry.encode(codes::COPY_PROFILE, &state, &ctx).unwrap()[..], &[1, 2, 0]);
        assert_eq!(&registry.encode(codes::SELECT_SETTING, &state, &ctx).unwrap()[..], &[2]);
    }

    #[test]
    fn test_unknown_code() {
        let registry = Registry::standard();
        let mut state = DeviceState::default();
        assert!(!registry.decode(9999, &mut state, ApiVersion::new(1, 41, 0), &[1, 2]).unwrap());
        assert!(matches!(
            registry.encode(9999, &state, &EncodeContext::new(ApiVersion::UNKNOWN)),
            Err(Error::NotEncodable { code: 9999 })
        ));
    }

    #[test]
    fn test_encode_only_code_is_not_decodable() {
        let mut registry = Registry::new();
        registry.encoder(codes::SET_NAME, |_, _, _| Ok(()));
        let mut state = DeviceState::default();
        assert!(registry.can_encode(codes::SET_NAME));
        assert!(!registry.can_decode(codes::SET_NAME));
        let err = registry
            .decode(codes::SET_NAME, &mut state, ApiVersion::new(1, 41, 0), &[])
            .unwrap_err();
        assert!(matches!(err, Error::NotDecodable { code: codes::SET_NAME }));
        assert_eq!(err.kind(), "not_decodable");
    }

    #[test]
    fn test_standard_encoders_accept_their_reply() {
        let registry = Registry::standard();
        for &code in codes::ALL.iter().filter(|&&c| registry.can_encode(c)) {
            assert!(registry.can_decode(code), "{}", codes::describe(code));
        }
    }

    #[test]
    fn test_ack_decodes() {
        let registry = Registry::standard();
        let mut state = DeviceState::default();
        let before = state.clone();
        assert!(registry.decode(codes::EEPROM_WRITE, &mut state, ApiVersion::new(1, 41, 0), &[]).unwrap());
        assert_eq!(state, before);
    }

    #[test]
    fn test_every_known_code_registered() {
        let registry = Registry::standard();
        let missing: Vec<String> = codes::ALL
            .iter()
            .filter(|&&c| c != codes::MULTIPLE_MSP && registry.get(c).is_none())
            .map(|&c| codes::describe(c))
            .collect();
        assert!(missing.is_empty(), "unregistered: {:?}", missing);
    }
}
