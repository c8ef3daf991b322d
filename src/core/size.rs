//! Human size strings (`1m`, `100GB`, `1.5g`, `4096`) to byte counts.
//!
//! Units are binary multiples and case-insensitive; a trailing `b` / `ib` is
//! accepted and ignored. A bare number is a byte count.

use crate::core::errors::{Result, TcfError};

const UNIT_STEPS: [(char, u32); 5] = [('k', 1), ('m', 2), ('g', 3), ('t', 4), ('p', 5)];

/// Largest size any document can carry: TOML integers are signed 64-bit.
pub const MAX_SIZE_BYTES: u64 = i64::MAX.unsigned_abs();

/// Fraction digits beyond this are truncated.
const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a size string into bytes.
pub fn parse_size(raw: &str) -> Result<u64> {
    let invalid = |details: &str| TcfError::InvalidSize {
        raw: raw.to_string(),
        details: details.to_string(),
    };

    let lowered = raw.trim().to_ascii_lowercase();
    let digits_end = lowered
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(lowered.len());
    let (number, suffix) = lowered.split_at(digits_end);
    if number.is_empty() {
        return Err(invalid("missing numeric value"));
    }

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() || fraction.contains('.') {
        return Err(invalid("malformed number"));
    }

    let suffix = suffix.trim();
    let suffix = suffix
        .strip_suffix("ib")
        .or_else(|| suffix.strip_suffix('b'))
        .unwrap_or(suffix);
    let exponent = match suffix {
        "" => 0,
        unit => {
            let mut chars = unit.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                return Err(invalid("unknown unit"));
            };
            UNIT_STEPS
                .iter()
                .find(|(letter, _)| *letter == c)
                .map(|(_, step)| *step)
                .ok_or_else(|| invalid("unknown unit"))?
        }
    };

    let multiplier = 1024_u128.pow(exponent);
    let whole: u128 = whole
        .parse()
        .map_err(|_| invalid("integer part out of range"))?;
    let mut total = whole
        .checked_mul(multiplier)
        .ok_or_else(|| invalid("value out of range"))?;

    let fraction = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
    if !fraction.is_empty() {
        let numerator: u128 = fraction
            .parse()
            .map_err(|_| invalid("malformed fraction"))?;
        #[allow(clippy::cast_possible_truncation)]
        let denominator = 10_u128.pow(fraction.len() as u32);
        total += numerator * multiplier / denominator;
    }

    u64::try_from(total)
        .ok()
        .filter(|bytes| *bytes <= MAX_SIZE_BYTES)
        .ok_or_else(|| invalid("value exceeds 8 EiB - 1 (signed 64-bit)"))
}

/// Available capacity that, after the builder's 10% reservation, leaves
/// exactly `usable` bytes: `ceil(usable * 10 / 9)`.
#[must_use]
pub fn gross_up_for_reservation(usable: u64) -> u64 {
    let scaled = u128::from(usable) * 10;
    let grossed = scaled.div_ceil(9);
    u64::try_from(grossed).unwrap_or(u64::MAX)
}

/// Usable capacity after the 10% reservation: `floor(available * 9 / 10)`.
#[must_use]
pub fn apply_reservation(available: u64) -> u64 {
    let reserved = u128::from(available) * 9 / 10;
    // Strictly smaller than `available`, so it always fits.
    u64::try_from(reserved).unwrap_or(u64::MAX)
}
