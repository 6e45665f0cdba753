//! Utility module
//!
//! Bit-mask helpers shared by the message families and duration
//! conversions used in reports.

/// Returns true when bit `bit` of `mask` is set
pub fn bit_check(mask: u32, bit: u32) -> bool {
    bit < 32 && mask & (1 << bit) != 0
}

/// Returns `mask` with bit `bit` set
pub fn bit_set(mask: u32, bit: u32) -> u32 {
    if bit < 32 {
        mask | (1 << bit)
    } else {
        mask
    }
}

/// Returns `mask` with bit `bit` cleared
pub fn bit_clear(mask: u32, bit: u32) -> u32 {
    if bit < 32 {
        mask & !(1 << bit)
    } else {
        mask
    }
}

/// Names from `table` whose bit is set in `mask`, in table order
pub fn names_from_mask(table: &[(&'static str, u32)], mask: u32) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(_, bit)| bit_check(mask, *bit))
        .map(|(name, _)| *name)
        .collect()
}

/// Mask with the bit of every known name set; unknown names are skipped
pub fn mask_from_names<S: AsRef<str>>(table: &[(&'static str, u32)], names: &[S]) -> u32 {
    names.iter().fold(0, |mask, name| {
        match table.iter().find(|(known, _)| *known == name.as_ref()) {
            Some((_, bit)) => bit_set(mask, *bit),
            None => mask,
        }
    })
}

/// Converts a duration to a floating-point number of milliseconds
pub fn duration_to_millis(duration: std::time::Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
