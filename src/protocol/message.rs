//! MSP message codes
//!
//! Codes share one namespace for requests and responses. Reads and their
//! matching `SET_` writes are distinct codes.

macro_rules! msp_codes {
    ($($name:ident = $value:literal;)*) => {
        $(
            #[allow(missing_docs)]
            pub const $name: u16 = $value;
        )*

        /// Returns the symbolic name of a known code
        pub fn name(code: u16) -> Option<&'static str> {
            match code {
                $($value => Some(stringify!($name)),)*
                _ => None,
            }
        }

        /// Every code the registry knows about, in ascending order
        pub const ALL: &[u16] = &[$($value,)*];
    };
}

msp_codes! {
    API_VERSION = 1;
    FC_VARIANT = 2;
    FC_VERSION = 3;
    BOARD_INFO = 4;
    BUILD_INFO = 5;
    NAME = 10;
    SET_NAME = 11;
    BATTERY_CONFIG = 32;
    SET_BATTERY_CONFIG = 33;
    MODE_RANGES = 34;
    SET_MODE_RANGE = 35;
    FEATURE_CONFIG = 36;
    SET_FEATURE_CONFIG = 37;
    BOARD_ALIGNMENT_CONFIG = 38;
    SET_BOARD_ALIGNMENT_CONFIG = 39;
    CURRENT_METER_CONFIG = 40;
    SET_CURRENT_METER_CONFIG = 41;
    MIXER_CONFIG = 42;
    SET_MIXER_CONFIG = 43;
    RX_CONFIG = 44;
    SET_RX_CONFIG = 45;
    LED_COLORS = 46;
    SET_LED_COLORS = 47;
    LED_STRIP_CONFIG = 48;
    SET_LED_STRIP_CONFIG = 49;
    RSSI_CONFIG = 50;
    SET_RSSI_CONFIG = 51;
    ADJUSTMENT_RANGES = 52;
    SET_ADJUSTMENT_RANGE = 53;
    CF_SERIAL_CONFIG = 54;
    SET_CF_SERIAL_CONFIG = 55;
    VOLTAGE_METER_CONFIG = 56;
    SET_VOLTAGE_METER_CONFIG = 57;
    SONAR = 58;
    PID_CONTROLLER = 59;
    SET_PID_CONTROLLER = 60;
    ARMING_CONFIG = 61;
    SET_ARMING_CONFIG = 62;
    RX_MAP = 64;
    SET_RX_MAP = 65;
    SET_REBOOT = 68;
    DATAFLASH_SUMMARY = 70;
    DATAFLASH_READ = 71;
    DATAFLASH_ERASE = 72;
    LOOP_TIME = 73;
    SET_LOOP_TIME = 74;
    FAILSAFE_CONFIG = 75;
    SET_FAILSAFE_CONFIG = 76;
    RXFAIL_CONFIG = 77;
    SET_RXFAIL_CONFIG = 78;
    SDCARD_SUMMARY = 79;
    BLACKBOX_CONFIG = 80;
    SET_BLACKBOX_CONFIG = 81;
    TRANSPONDER_CONFIG = 82;
    SET_TRANSPONDER_CONFIG = 83;
    OSD_CONFIG = 84;
    SET_OSD_CONFIG = 85;
    OSD_CHAR_READ = 86;
    OSD_CHAR_WRITE = 87;
    VTX_CONFIG = 88;
    SET_VTX_CONFIG = 89;
    ADVANCED_CONFIG = 90;
    SET_ADVANCED_CONFIG = 91;
    FILTER_CONFIG = 92;
    SET_FILTER_CONFIG = 93;
    PID_ADVANCED = 94;
    SET_PID_ADVANCED = 95;
    SENSOR_CONFIG = 96;
    SET_SENSOR_CONFIG = 97;
    ARMING_DISABLE = 99;
    STATUS = 101;
    RAW_IMU = 102;
    SERVO = 103;
    MOTOR = 104;
    RC = 105;
    RAW_GPS = 106;
    COMP_GPS = 107;
    ATTITUDE = 108;
    ALTITUDE = 109;
    ANALOG = 110;
    RC_TUNING = 111;
    PID = 112;
    MISC = 114;
    BOXNAMES = 116;
    PIDNAMES = 117;
    BOXIDS = 119;
    SERVO_CONFIGURATIONS = 120;
    MOTOR_3D_CONFIG = 124;
    RC_DEADBAND = 125;
    SENSOR_ALIGNMENT = 126;
    LED_STRIP_MODECOLOR = 127;
    VOLTAGE_METERS = 128;
    CURRENT_METERS = 129;
    BATTERY_STATE = 130;
    MOTOR_CONFIG = 131;
    GPS_CONFIG = 132;
    COMPASS_CONFIG = 133;
    GPS_RESCUE = 135;
    STATUS_EX = 150;
    UID = 160;
    GPS_SV_INFO = 164;
    DISPLAYPORT = 182;
    COPY_PROFILE = 183;
    BEEPER_CONFIG = 184;
    SET_BEEPER_CONFIG = 185;
    SET_RAW_RC = 200;
    SET_PID = 202;
    SET_RC_TUNING = 204;
    ACC_CALIBRATION = 205;
    MAG_CALIBRATION = 206;
    SET_MISC = 207;
    RESET_CONF = 208;
    SELECT_SETTING = 210;
    SET_SERVO_CONFIGURATION = 212;
    SET_MOTOR = 214;
    SET_MOTOR_3D_CONFIG = 217;
    SET_RC_DEADBAND = 218;
    SET_RESET_CURR_PID = 219;
    SET_SENSOR_ALIGNMENT = 220;
    SET_LED_STRIP_MODECOLOR = 221;
    SET_MOTOR_CONFIG = 222;
    SET_GPS_CONFIG = 223;
    SET_COMPASS_CONFIG = 224;
    SET_GPS_RESCUE = 225;
    MULTIPLE_MSP = 230;
    MODE_RANGES_EXTRA = 238;
    SET_ACC_TRIM = 239;
    ACC_TRIM = 240;
    SERVO_MIX_RULES = 241;
    SET_RTC = 246;
    EEPROM_WRITE = 250;
    DEBUG = 254;
}

/// Human readable label for logs, falling back to the number
pub fn describe(code: u16) -> String {
    match name(code) {
        Some(name) => format!("MSP_{}({})", name, code),
        None => format!("MSP({})", code),
    }
}

/// Returns true for codes that need a generation 2 frame
pub fn requires_v2(code: u16) -> bool {
    code > crate::core::MAX_V1_CODE
}
