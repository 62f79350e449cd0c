//! Fixed-point numerics of the dynamic int8 quantizer.
//!
//! A GEMV result is quantized in two passes. Calibration finds the largest magnitude over all
//! rows, then every row is scaled by `127 / max_abs` and saturated to `i8`. The hardware keeps
//! the scale as a Q8.24 reciprocal so the per-row work is a multiply, a rounding add and a shift.

mod divider;
mod fixed;

pub use divider::RestoringDivider;
pub use fixed::{mul_32x32, Q8_24};

/// Largest magnitude of the output type.
pub const QMAX: i32 = i8::MAX as i32;

/// Dividend of the reciprocal division, `127` in Q8.24.
pub const RECIP_NUMERATOR: u32 = (QMAX as u32) << Q8_24::FRAC_BITS;

const ROUND: i64 = 1 << (Q8_24::FRAC_BITS - 1);

/// Pass one: the largest absolute value over all accumulators.
pub fn calibrate(acc: &[i32]) -> u32 {
    acc.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0)
}

/// Result of calibration and scale derivation for one GEMV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizationState {
    pub max_abs: u32,
    /// `max_abs / 127`, saturating; one when `max_abs` is zero.
    pub scale: Q8_24,
    /// `floor(127 / max_abs)` as applied on the data path; zero when `max_abs` is zero.
    pub recip: Q8_24,
}

impl QuantizationState {
    /// Derive the scale for `max_abs`, running the divider to completion.
    pub fn derive(max_abs: u32) -> Self {
        if max_abs == 0 {
            return Self::finish(0, 0);
        }
        let mut divider = RestoringDivider::new(RECIP_NUMERATOR, max_abs);
        while !divider.step() {}
        Self::finish(max_abs, divider.quotient())
    }

    /// Build the state from the divider's quotient.
    ///
    /// The quotient is checked with an exact multiply and nudged until
    /// `recip * max_abs <= 127 << 24 < (recip + 1) * max_abs`.
    pub fn finish(max_abs: u32, quotient: u32) -> Self {
        if max_abs == 0 {
            return Self {
                max_abs,
                scale: Q8_24::ONE,
                recip: Q8_24::ZERO,
            };
        }

        // Past i32::MAX the true quotient is zero and the operands no longer fit the multiplier.
        let recip = if max_abs > i32::MAX as u32 {
            0
        } else {
            let target = RECIP_NUMERATOR as i64;
            let divisor = max_abs as i32;
            let mut recip = quotient.min(RECIP_NUMERATOR) as i32;
            while recip > 0 && mul_32x32(recip, divisor) > target {
                recip -= 1;
            }
            while mul_32x32(recip + 1, divisor) <= target {
                recip += 1;
            }
            recip
        };

        Self {
            max_abs,
            scale: Q8_24::from_ratio(max_abs, QMAX as u32),
            recip: Q8_24::from_bits(recip as u32),
        }
    }

    /// Pass two for one row: `clamp((acc * recip + 2^23) >> 24, -128, 127)`.
    pub fn quantize(&self, acc: i32) -> i8 {
        let product = mul_32x32(acc, self.recip.to_bits() as i32);
        let rounded = (product + ROUND) >> Q8_24::FRAC_BITS;
        rounded.clamp(i8::MIN as i64, i8::MAX as i64) as i8
    }

    pub fn quantize_all(&self, acc: &[i32]) -> Vec<i8> {
        acc.iter().map(|&v| self.quantize(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn two_row_example() {
        let acc = [1150, -1650];
        let state = QuantizationState::derive(calibrate(&acc));
        assert_eq!(state.max_abs, 1650);
        assert_eq!(state.recip.to_bits(), 1291337);
        assert!((state.scale.to_f64() - 12.99).abs() < 0.01);
        assert_eq!(state.quantize_all(&acc), vec![89, -127]);
    }

    #[test]
    fn zero_accumulators_quantize_to_zero() {
        let state = QuantizationState::derive(calibrate(&[0, 0, 0]));
        assert_eq!(state.scale, Q8_24::ONE);
        assert_eq!(state.quantize_all(&[0, 0, 0]), vec![0, 0, 0]);
        assert_eq!(calibrate(&[]), 0);
    }

    #[test]
    fn reference_pipeline_vectors() {
        // Reciprocal, input, expected output.
        let cases = [
            (1u32 << 24, 1000, 127),
            (1 << 24, 127, 127),
            (1 << 23, 50, 25),
            (1 << 22, 200, 50),
            (1 << 24, -1000, -128),
        ];
        for (recip, acc, expected) in cases {
            let state = QuantizationState {
                max_abs: 1,
                scale: Q8_24::ONE,
                recip: Q8_24::from_bits(recip),
            };
            assert_eq!(state.quantize(acc), expected, "acc {acc}");
        }
    }

    #[test]
    fn large_magnitude_calibration() {
        let state = QuantizationState::derive(239194);
        assert_eq!(state.recip.to_bits(), 8907);
        assert_eq!(state.quantize(4952), 3);
        assert_eq!(state.quantize(147731), 78);
        assert_eq!(calibrate(&[i32::MIN, 5]), 1 << 31);
        assert_eq!(QuantizationState::derive(1 << 31).quantize(i32::MIN), 0);
    }

    #[test]
    fn wrong_quotient_is_corrected() {
        assert_eq!(QuantizationState::finish(1650, 1291340).recip.to_bits(), 1291337);
        assert_eq!(QuantizationState::finish(1650, 0).recip.to_bits(), 1291337);
    }

    #[test]
    fn extreme_accumulators_saturate() {
        let state = QuantizationState {
            max_abs: 1,
            scale: Q8_24::ONE,
            recip: Q8_24::from_bits(RECIP_NUMERATOR),
        };
        assert_eq!(state.quantize(i32::MAX), 127);
        assert_eq!(state.quantize(i32::MIN), -128);
        assert_eq!(state.quantize(-1), -127);
        assert_eq!(state.quantize(0), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(512))]

        #[test]
        fn reciprocal_brackets_the_numerator(max_abs in 1u32..=i32::MAX as u32) {
            let state = QuantizationState::derive(max_abs);
            let recip = state.recip.to_bits() as u64;
            prop_assert!(recip * max_abs as u64 <= RECIP_NUMERATOR as u64);
            prop_assert!((recip + 1) * max_abs as u64 > RECIP_NUMERATOR as u64);
        }

        #[test]
        fn calibrated_rows_never_saturate_negative(acc in prop::collection::vec(-(1i32 << 30)..(1 << 30), 1..64)) {
            let state = QuantizationState::derive(calibrate(&acc));
            for &v in &acc {
                let y = state.quantize(v) as i32;
                prop_assert!((-QMAX..=QMAX).contains(&y));
                // Same sign as the accumulator or zero.
                prop_assert!(y == 0 || (y > 0) == (v > 0));
            }
        }

        #[test]
        fn largest_row_maps_near_full_scale(max_abs in 1i32..(1 << 24)) {
            let state = QuantizationState::derive(max_abs as u32);
            let y = state.quantize(max_abs);
            prop_assert!(y == 127 || y == 126, "max_abs {} -> {}", max_abs, y);
        }

        #[test]
        fn quantize_saturates_any_accumulator(acc in any::<i32>(), recip in 0u32..=RECIP_NUMERATOR) {
            let state = QuantizationState {
                max_abs: 1,
                scale: Q8_24::ONE,
                recip: Q8_24::from_bits(recip),
            };
            let exact = (acc as i128 * recip as i128 + ROUND as i128) >> Q8_24::FRAC_BITS;
            prop_assert_eq!(state.quantize(acc) as i128, exact.clamp(-128, 127));
        }

        #[test]
        fn max_abs_is_largest_magnitude(acc in prop::collection::vec(any::<i32>(), 0..64)) {
            let max_abs = calibrate(&acc);
            prop_assert!(acc.iter().all(|v| v.unsigned_abs() <= max_abs));
            prop_assert!(acc.is_empty() || acc.iter().any(|v| v.unsigned_abs() == max_abs));
        }
    }
}
