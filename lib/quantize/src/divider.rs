/// Restoring divider producing one quotient bit per step, most significant first.
#[derive(Debug, Clone)]
pub struct RestoringDivider {
    dividend: u32,
    divisor: u32,
    quotient: u32,
    remainder: u64,
    bit: u32,
}

impl RestoringDivider {
    /// Number of steps needed for a full division.
    pub const STEPS: u32 = 32;

    pub fn new(dividend: u32, divisor: u32) -> Self {
        Self {
            dividend,
            divisor,
            quotient: 0,
            remainder: 0,
            bit: Self::STEPS,
        }
    }

    pub fn is_done(&self) -> bool {
        self.bit == 0
    }

    /// Retire one quotient bit. Returns `true` once all bits are known.
    pub fn step(&mut self) -> bool {
        if self.bit == 0 {
            return true;
        }
        self.bit -= 1;
        self.remainder = (self.remainder << 1) | ((self.dividend >> self.bit) & 1) as u64;
        if self.remainder >= self.divisor as u64 {
            self.remainder -= self.divisor as u64;
            self.quotient |= 1 << self.bit;
        }
        self.bit == 0
    }

    pub fn quotient(&self) -> u32 {
        self.quotient
    }

    pub fn remainder(&self) -> u32 {
        self.remainder as u32
    }
}
