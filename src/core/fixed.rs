//! Payout Arithmetic
//!
//! Integer-only arithmetic for pool accounting. Amounts are `u64` base units;
//! every product is widened to `u128` so `stake * pool` cannot overflow.
//!
//! ## Format: Q32.32
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q32.32 (64-bit unsigned integer)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [IIIIIIII...IIIIIIII][FFFFFFFF...FFFFFFFF]                 │
//! │   └──── 32 bits ────┘ └──── 32 bits ────┘                   │
//! │                                                             │
//! │  Range: 0.0 to 4294967295.99999 (approx)                    │
//! │  Precision: 1/2^32 ≈ 0.00000000023                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The fixed-point ratio is for display only. Payouts are computed with
//! [`mul_div_floor`], which rounds once, at the very end.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Q32.32 fixed-point number stored as u64.
pub type Fixed = u64;

/// Number of fractional bits (32)
pub const FIXED_SCALE: u32 = 32;

/// 1.0 in fixed-point
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE;

/// Base units per whole token unit used in demos and tests (gwei per ETH).
pub const UNIT: u64 = 1_000_000_000;

/// Floor of `a * b / c` without intermediate overflow.
///
/// Returns `None` when `c == 0` or the quotient does not fit in `u64`.
#[inline]
pub fn mul_div_floor(a: u64, b: u64, c: u64) -> Option<u64> {
    if c == 0 {
        return None;
    }
    let wide = (a as u128) * (b as u128) / (c as u128);
    u64::try_from(wide).ok()
}

/// Fixed-point quotient `num / den`.
///
/// Saturates at `u64::MAX`; returns `None` on divide-by-zero.
#[inline]
pub fn fixed_from_ratio(num: u64, den: u64) -> Option<Fixed> {
    if den == 0 {
        return None;
    }
    let wide = ((num as u128) << FIXED_SCALE) / (den as u128);
    Some(u64::try_from(wide).unwrap_or(u64::MAX))
}

/// Convert fixed-point to float for display.
///
/// # Warning
/// Only use for log/wire output. Never feed the result back into accounting.
#[inline]
pub fn to_float(f: Fixed) -> f64 {
    f as f64 / FIXED_ONE as f64
}

/// Convert base units to whole units for display.
#[inline]
pub fn units_to_float(amount: u64) -> f64 {
    amount as f64 / UNIT as f64
}

/// Ergonomic wrapper around a Q32.32 value with formatting.
///
/// Serializes as the raw Q32.32 integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedNum(pub Fixed);

impl FixedNum {
    /// Create from raw fixed-point value
    #[inline]
    pub const fn from_raw(raw: Fixed) -> Self {
        Self(raw)
    }

    /// Get raw fixed-point value
    #[inline]
    pub const fn raw(self) -> Fixed {
        self.0
    }

    /// Convert to float for display
    #[inline]
    pub fn to_float(self) -> f64 {
        to_float(self.0)
    }
}

impl fmt::Debug for FixedNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({:.4})", self.to_float())
    }
}

impl fmt::Display for FixedNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_float())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_constants() {
        assert_eq!(FIXED_ONE, 4_294_967_296);
        assert_eq!(FIXED_SCALE, 32);
    }

    #[test]
    fn test_mul_div_floor() {
        // 1 unit * 3 units / 1 unit = 3 units
        assert_eq!(mul_div_floor(UNIT, 3 * UNIT, UNIT), Some(3 * UNIT));

        // Floors the quotient
        assert_eq!(mul_div_floor(10, 10, 3), Some(33));

        // Divide by zero
        assert_eq!(mul_div_floor(1, 1, 0), None);

        // Intermediate would overflow u64 but the result fits
        assert_eq!(mul_div_floor(u64::MAX, u64::MAX, u64::MAX), Some(u64::MAX));

        // Result does not fit
        assert_eq!(mul_div_floor(u64::MAX, 2, 1), None);
    }

    #[test]
    fn test_fixed_from_ratio() {
        assert_eq!(fixed_from_ratio(3, 1), Some(3 * FIXED_ONE));
        assert_eq!(fixed_from_ratio(1, 2), Some(FIXED_ONE / 2));
        assert_eq!(fixed_from_ratio(1, 0), None);
        assert_eq!(fixed_from_ratio(u64::MAX, 1), Some(u64::MAX));
    }

    #[test]
    fn test_fixednum_display() {
        let three = FixedNum::from_raw(3 * FIXED_ONE);
        assert_eq!(three.to_string(), "3.0000");
        assert_eq!(FixedNum::from_raw(FIXED_ONE / 4).to_string(), "0.2500");
        assert_eq!(format!("{:?}", FixedNum::from_raw(FIXED_ONE)), "Fixed(1.0000)");
        assert_eq!(serde_json::to_string(&three).unwrap(), (3 * FIXED_ONE).to_string());
    }

    #[test]
    fn test_units_to_float() {
        assert!((units_to_float(3 * UNIT) - 3.0).abs() < f64::EPSILON);
    }
}
