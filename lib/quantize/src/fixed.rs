/// Unsigned fixed point with 8 integer and 24 fraction bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Q8_24(u32);

impl Q8_24 {
    pub const FRAC_BITS: u32 = 24;
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1 << Self::FRAC_BITS);
    pub const MAX: Self = Self(u32::MAX);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> u32 {
        self.0
    }

    /// `num / den` truncated towards zero, saturating at [`Q8_24::MAX`].
    pub const fn from_ratio(num: u32, den: u32) -> Self {
        assert!(den != 0);
        let q = ((num as u64) << Self::FRAC_BITS) / den as u64;
        if q > u32::MAX as u64 {
            Self::MAX
        } else {
            Self(q as u32)
        }
    }

    /// For reporting only; never used on the data path.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / (1u64 << Self::FRAC_BITS) as f64
    }
}

impl core::fmt::Debug for Q8_24 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.6}q", self.to_f64())
    }
}

impl core::fmt::Display for Q8_24 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.4}", self.to_f64())
    }
}

/// Exact signed 32x32 -> 64 multiply.
pub const fn mul_32x32(a: i32, b: i32) -> i64 {
    a as i64 * b as i64
}
