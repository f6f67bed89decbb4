//! Scaled-integer arithmetic
//!
//! Every loop in this crate runs on 32-bit integers with an implied binary
//! point. `Q<FRAC>` carries the number of fractional bits in the type so a
//! Q15 gain cannot silently be multiplied as if it were a Q24 coefficient.
//! Products are formed in 64 bits and saturated back to 32 bits.

/// Fixed-point value with `FRAC` fractional bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Q<const FRAC: u32>(i32);

pub type Q4 = Q<4>;
pub type Q8 = Q<8>;
pub type Q10 = Q<10>;
pub type Q12 = Q<12>;
pub type Q15 = Q<15>;
pub type Q16 = Q<16>;
pub type Q24 = Q<24>;
pub type Q30 = Q<30>;

impl<const FRAC: u32> Q<FRAC> {
    /// Zero in any format
    pub const ZERO: Self = Self(0);

    /// Scale of one unit, `2^FRAC`
    pub const SCALE: i64 = 1 << FRAC;

    /// Wrap an already scaled integer
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Integer value carrying one unit
    pub const fn from_int(value: i32) -> Self {
        Self(saturate((value as i64) << FRAC))
    }

    /// Convert a real number, rounding half away from zero
    ///
    /// Out-of-range values saturate at the 32-bit bounds.
    pub fn from_f32(value: f32) -> Self {
        let scaled = libm::roundf(value * Self::SCALE as f32);
        if scaled >= i32::MAX as f32 {
            Self(i32::MAX)
        } else if scaled <= i32::MIN as f32 {
            Self(i32::MIN)
        } else {
            Self(scaled as i32)
        }
    }

    /// Scaled integer
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// `self * x` rescaled to the units of `x`
    pub const fn mul(self, x: i32) -> i32 {
        saturate((self.0 as i64 * x as i64) >> FRAC)
    }

    /// `self * x` kept at full precision (still scaled by `2^FRAC`)
    pub const fn mul_wide(self, x: i64) -> i64 {
        (self.0 as i64).saturating_mul(x)
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

/// Saturate a 64-bit intermediate back into 32 bits
pub const fn saturate(value: i64) -> i32 {
    if value > i32::MAX as i64 {
        i32::MAX
    } else if value < i32::MIN as i64 {
        i32::MIN
    } else {
        value as i32
    }
}

/// Clamp `value` into `[low, high]`
///
/// Unlike `Ord::clamp` this never panics: with `low > high` the upper
/// bound wins, which is what the loops expect when a dynamic bound crosses
/// a fixed one.
pub const fn limit(value: i32, low: i32, high: i32) -> i32 {
    if value > high {
        high
    } else if value < low {
        low
    } else {
        value
    }
}

/// Convert a frequency in Hz to a period in ns
pub fn period_ns(frequency_hz: u32) -> i32 {
    if frequency_hz == 0 {
        return i32::MAX;
    }
    saturate(1_000_000_000_i64 / frequency_hz as i64)
}

/// Convert a physical quantity to the 10 mV / 10 mA integer units used by the
/// loops (100 LSB per V or A), truncating like a cast.
pub fn centi(value: f32) -> i32 {
    (value * 100.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32_rounds_half_away_from_zero() {
        assert_eq!(Q15::from_f32(0.5).raw(), 16384);
        assert_eq!(Q8::from_f32(0.001953125).raw(), 1); // 0.5 LSB
        assert_eq!(Q8::from_f32(-0.001953125).raw(), -1);
        assert_eq!(Q12::from_f32(1.0).raw(), 4096);
    }

    #[test]
    fn test_from_f32_saturates() {
        assert_eq!(Q24::from_f32(1000.0).raw(), i32::MAX);
        assert_eq!(Q24::from_f32(-1000.0).raw(), i32::MIN);
    }

    #[test]
    fn test_mul_rescales() {
        let half = Q15::from_f32(0.5);
        assert_eq!(half.mul(1000), 500);
        assert_eq!(Q12::from_int(2).mul(-300), -600);
    }

    #[test]
    fn test_mul_truncates_toward_negative_infinity() {
        let third = Q8::from_raw(85);
        assert_eq!(third.mul(3), 0);
        assert_eq!(third.mul(-3), -1);
    }

    #[test]
    fn test_limit_does_not_panic_on_crossed_bounds() {
        assert_eq!(limit(5, 0, 10), 5);
        assert_eq!(limit(-5, 0, 10), 0);
        assert_eq!(limit(15, 0, 10), 10);
        assert_eq!(limit(5, 10, 0), 0);
    }

    #[test]
    fn test_period_ns() {
        assert_eq!(period_ns(320_000), 3125);
        assert_eq!(period_ns(71_000), 14084);
        assert_eq!(period_ns(145_000), 6896);
        assert_eq!(period_ns(0), i32::MAX);
    }

    #[test]
    fn test_centi() {
        assert_eq!(centi(54.5), 5450);
        assert_eq!(centi(-1.5), -150);
        assert_eq!(centi(74.07), 7407);
    }
}
