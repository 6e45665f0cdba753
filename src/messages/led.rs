//! LED strip layout, colours and mode colours
//!
//! Directions and functions are kept as the single-letter codes the
//! firmware CLI uses, e.g. `"ne"` and `"cw"`. Before API 1.20 every LED
//! carries two 16-bit masks. From 1.20 an LED packs into one word:
//!
//! | bits  | field      |
//! |-------|------------|
//! | 0-3   | y          |
//! | 4-7   | x          |
//! | 8-11  | function   |
//! | 12-17 | overlays   |
//! | 18-21 | colour     |
//! | 22-27 | directions |
//! | 28-31 | parameters |

use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::core::{ApiVersion, Result};
use crate::protocol::message as codes;
use crate::util::{bit_check, bit_set};
use super::buffer::PayloadReader;
use super::registry::{EncodeContext, Registry};
use super::DeviceState;

/// Directions in mask bit order
pub const DIRECTION_LETTERS: [char; 6] = ['n', 'e', 's', 'w', 'u', 'd'];
/// Legacy function letters in mask bit order
pub const FUNCTION_LETTERS: [char; 11] = ['i', 'w', 'f', 'a', 't', 'r', 'c', 'g', 's', 'b', 'l'];
/// Base functions by id
pub const BASE_FUNCTION_LETTERS: [char; 7] = ['c', 'f', 'a', 'l', 's', 'g', 'r'];
const OVERLAY_LETTERS_LEGACY: [char; 6] = ['t', 'o', 'b', 'n', 'i', 'w'];
const OVERLAY_LETTERS: [char; 6] = ['t', 'o', 'b', 'v', 'i', 'w'];

const LEGACY_RECORD: usize = 7;
const PACKED_RECORD: usize = 4;
// advanced-profile flag and current profile follow the LEDs from 1.41
const PROFILE_TRAILER: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Led {
    pub x: u8,
    pub y: u8,
    pub directions: String,
    pub functions: String,
    pub color: u8,
    pub parameters: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedProfileSupport {
    pub advanced_profile_support: bool,
    pub current_profile: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedColor {
    pub hue: u16,
    pub saturation: u8,
    pub value: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedModeColor {
    pub mode: u8,
    pub direction: u8,
    pub color: u8,
}

fn overlay_letters(version: ApiVersion) -> &'static [char; 6] {
    if version.at_least(1, 36) {
        &OVERLAY_LETTERS
    } else {
        &OVERLAY_LETTERS_LEGACY
    }
}

fn letters_from_mask(letters: &[char], mask: u32) -> String {
    letters
        .iter()
        .enumerate()
        .filter(|(bit, _)| bit_check(mask, *bit as u32))
        .map(|(_, letter)| *letter)
        .collect()
}

fn mask_from_letters(letters: &[char], text: &str) -> u32 {
    text.chars().fold(0, |mask, c| match letters.iter().position(|&l| l == c) {
        Some(bit) => bit_set(mask, bit as u32),
        None => mask,
    })
}

/// Unpacks an API 1.20+ LED word
pub fn unpack_led(version: ApiVersion, word: u32) -> Led {
    let mut functions = String::new();
    if let Some(&base) = BASE_FUNCTION_LETTERS.get(((word >> 8) & 0xF) as usize) {
        functions.push(base);
    }
    functions.push_str(&letters_from_mask(overlay_letters(version), (word >> 12) & 0x3F));

    Led {
        y: (word & 0xF) as u8,
        x: ((word >> 4) & 0xF) as u8,
        functions,
        color: ((word >> 18) & 0xF) as u8,
        directions: letters_from_mask(&DIRECTION_LETTERS, (word >> 22) & 0x3F),
        parameters: ((word >> 28) & 0xF) as u8,
    }
}

/// Packs an LED into the API 1.20+ word. Only the first base function is kept.
pub fn pack_led(version: ApiVersion, led: &Led) -> u32 {
    let mut word = (led.y as u32 & 0xF) | ((led.x as u32 & 0xF) << 4);
    if let Some(id) = led
        .functions
        .chars()
        .find_map(|c| BASE_FUNCTION_LETTERS.iter().position(|&l| l == c))
    {
        word |= (id as u32) << 8;
    }
    word |= mask_from_letters(overlay_letters(version), &led.functions) << 12;
    word |= (led.color as u32 & 0xF) << 18;
    word |= mask_from_letters(&DIRECTION_LETTERS, &led.directions) << 22;
    word |= (led.parameters as u32 & 0xF) << 28;
    word
}

pub(super) fn register(registry: &mut Registry) {
    registry
        .decoder(codes::LED_STRIP_CONFIG, decode_led_strip)
        .encoder(codes::SET_LED_STRIP_CONFIG, encode_led)
        .ack(codes::SET_LED_STRIP_CONFIG, "LED strip configuration saved")
        .decoder(codes::LED_COLORS, decode_led_colors)
        .encoder(codes::SET_LED_COLORS, encode_led_colors)
        .ack(codes::SET_LED_COLORS, "LED colours saved")
        .decoder(codes::LED_STRIP_MODECOLOR, decode_mode_colors)
        .encoder(codes::SET_LED_STRIP_MODECOLOR, encode_mode_color)
        .ack(codes::SET_LED_STRIP_MODECOLOR, "LED mode colour saved");
}

fn decode_led_strip(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let mut leds = Vec::new();
    let mut profile = LedProfileSupport::default();

    if !version.at_least(1, 20) {
        for _ in 0..r.records(LEGACY_RECORD) {
            let directions = letters_from_mask(&DIRECTION_LETTERS, r.u16()? as u32);
            let functions = letters_from_mask(&FUNCTION_LETTERS, r.u16()? as u32);
            leds.push(Led {
                directions,
                functions,
                x: r.u8()?,
                y: r.u8()?,
                color: r.u8()?,
                parameters: 0,
            });
        }
    } else {
        let count = if version.at_least(1, 41) {
            r.len().saturating_sub(PROFILE_TRAILER) / PACKED_RECORD
        } else {
            r.records(PACKED_RECORD)
        };
        for _ in 0..count {
            leds.push(unpack_led(version, r.u32()?));
        }
        if version.at_least(1, 41) {
            profile.advanced_profile_support = r.u8()? != 0;
            profile.current_profile = r.u8()?;
        }
    }

    state.led_strip = leds;
    state.led_profile = profile;
    Ok(())
}

fn encode_led(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let led = ctx.item(codes::SET_LED_STRIP_CONFIG, &state.led_strip)?;
    dst.put_u8(ctx.wire_index(codes::SET_LED_STRIP_CONFIG)?);
    if ctx.version.at_least(1, 20) {
        dst.put_u32_le(pack_led(ctx.version, led));
    } else {
        dst.put_u16_le(mask_from_letters(&DIRECTION_LETTERS, &led.directions) as u16);
        dst.put_u16_le(mask_from_letters(&FUNCTION_LETTERS, &led.functions) as u16);
        dst.put_u8(led.x);
        dst.put_u8(led.y);
        dst.put_u8(led.color);
    }
    Ok(())
}

fn decode_led_colors(state: &mut DeviceState, _: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    let count = r.records(4);
    let mut colors = Vec::with_capacity(count);
    for _ in 0..count {
        colors.push(LedColor {
            hue: r.u16()?,
            saturation: r.u8()?,
            value: r.u8()?,
        });
    }
    state.led_colors = colors;
    Ok(())
}

fn encode_led_colors(state: &DeviceState, _: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    for color in &state.led_colors {
        dst.put_u16_le(color.hue);
        dst.put_u8(color.saturation);
        dst.put_u8(color.value);
    }
    Ok(())
}

fn decode_mode_colors(state: &mut DeviceState, version: ApiVersion, r: &mut PayloadReader<'_>) -> Result<()> {
    if !version.at_least(1, 19) {
        return Ok(());
    }
    let count = r.records(3);
    let mut colors = Vec::with_capacity(count);
    for _ in 0..count {
        colors.push(LedModeColor {
            mode: r.u8()?,
            direction: r.u8()?,
            color: r.u8()?,
        });
    }
    state.led_mode_colors = colors;
    Ok(())
}

fn encode_mode_color(state: &DeviceState, ctx: &EncodeContext, dst: &mut BytesMut) -> Result<()> {
    let mode_color = ctx.item(codes::SET_LED_STRIP_MODECOLOR, &state.led_mode_colors)?;
    dst.put_u8(mode_color.mode);
    dst.put_u8(mode_color.direction);
    dst.put_u8(mode_color.color);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::testing::{decode, encode_indexed, roundtrip};

    fn led(x: u8, y: u8, functions: &str, directions: &str, color: u8) -> Led {
        Led {
            x,
            y,
            directions: directions.into(),
            functions: functions.into(),
            color,
            parameters: 0,
        }
    }

    #[test]
    fn test_led_word_layout() {
        let version = ApiVersion::new(1, 40, 0);
        // x=3 y=2, function 'f' (id 1), overlay 'w' (bit 5), colour 7, directions n+u
        let word = pack_led(version, &led(3, 2, "fw", "nu", 7));
        assert_eq!(word & 0xF, 2);
        assert_eq!((word >> 4) & 0xF, 3);
        assert_eq!((word >> 8) & 0xF, 1);
        assert_eq!((word >> 12) & 0x3F, 1 << 5);
        assert_eq!((word >> 18) & 0xF, 7);
        assert_eq!((word >> 22) & 0x3F, 0b1_0001);
        assert_eq!(unpack_led(version, word), led(3, 2, "fw", "nu", 7));
    }

    #[test]
    fn test_overlay_letters_by_version() {
        let word = 1 << (12 + 3);
        assert_eq!(unpack_led(ApiVersion::new(1, 35, 0), word).functions, "cn");
        assert_eq!(unpack_led(ApiVersion::new(1, 36, 0), word).functions, "cv");
    }

    #[test]
    fn test_strip_with_profile_trailer() {
        let version = ApiVersion::new(1, 41, 0);
        let mut payload = Vec::new();
        payload.extend(pack_led(version, &led(0, 0, "c", "", 1)).to_le_bytes());
        payload.extend(pack_led(version, &led(1, 0, "a", "e", 2)).to_le_bytes());
        payload.extend([1, 2]);
        let state = decode(codes::LED_STRIP_CONFIG, version, &payload);
        assert_eq!(state.led_strip.len(), 2);
        assert_eq!(state.led_strip[1].functions, "a");
        assert!(state.led_profile.advanced_profile_support);
        assert_eq!(state.led_profile.current_profile, 2);
    }

    #[test]
    fn test_legacy_led_records() {
        let version = ApiVersion::new(1, 19, 0);
        let mut state = DeviceState::default();
        state.led_strip = vec![led(5, 6, "wt", "es", 3)];
        let bytes = encode_indexed(codes::SET_LED_STRIP_CONFIG, &state, version, 0);
        assert_eq!(bytes, vec![0, 0b0110, 0, 0b1_0010, 0, 5, 6, 3]);

        let decoded = decode(codes::LED_STRIP_CONFIG, version, &bytes[1..]);
        assert_eq!(decoded.led_strip, state.led_strip);
    }

    #[test]
    fn test_colors_roundtrip() {
        let mut state = DeviceState::default();
        state.led_colors = vec![
            LedColor { hue: 0, saturation: 0, value: 0 },
            LedColor { hue: 359, saturation: 255, value: 128 },
        ];
        let (bytes, decoded) = roundtrip(codes::LED_COLORS, codes::SET_LED_COLORS, &state, ApiVersion::new(1, 41, 0));
        assert_eq!(bytes.len(), 8);
        assert_eq!(decoded.led_colors, state.led_colors);
    }

    #[test]
    fn test_mode_colors() {
        let state = decode(codes::LED_STRIP_MODECOLOR, ApiVersion::new(1, 19, 0), &[0, 1, 2, 6, 0, 9]);
        assert_eq!(state.led_mode_colors[1], LedModeColor { mode: 6, direction: 0, color: 9 });
        let bytes = encode_indexed(codes::SET_LED_STRIP_MODECOLOR, &state, ApiVersion::new(1, 19, 0), 1);
        assert_eq!(bytes, vec![6, 0, 9]);

        let old = decode(codes::LED_STRIP_MODECOLOR, ApiVersion::new(1, 18, 0), &[0, 1, 2]);
        assert!(old.led_mode_colors.is_empty());
    }
}
