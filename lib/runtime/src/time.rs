use core::ops::{Add, AddAssign, Mul, Sub};

/// A span of simulated clock cycles.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, Hash)]
pub struct Cycles(u64);

impl core::fmt::Debug for Cycles {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} cycles", self.0)
    }
}

impl Cycles {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);

    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub const fn count(self) -> u64 {
        self.0
    }
}

impl From<u32> for Cycles {
    fn from(v: u32) -> Self {
        Self(v as u64)
    }
}

impl From<u64> for Cycles {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Add<Cycles> for Cycles {
    type Output = Cycles;

    fn add(self, rhs: Cycles) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign<Cycles> for Cycles {
    fn add_assign(&mut self, rhs: Cycles) {
        self.0 += rhs.0;
    }
}

impl Mul<u32> for Cycles {
    type Output = Cycles;

    fn mul(self, rhs: u32) -> Self::Output {
        Self(self.0 * rhs as u64)
    }
}

impl Mul<u64> for Cycles {
    type Output = Cycles;

    fn mul(self, rhs: u64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Mul<usize> for Cycles {
    type Output = Cycles;

    fn mul(self, rhs: usize) -> Self::Output {
        Self(self.0 * rhs as u64)
    }
}

/// A clock edge of the simulated system.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Tick(u64);

impl core::fmt::Debug for Tick {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if *self == Self::ETERNITY {
            write!(f, "eternity")
        } else {
            write!(f, "tick {}", self.0)
        }
    }
}

impl Add<Cycles> for Tick {
    type Output = Tick;

    fn add(self, rhs: Cycles) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<Cycles> for Tick {
    fn add_assign(&mut self, rhs: Cycles) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub<Tick> for Tick {
    type Output = Cycles;

    fn sub(self, rhs: Tick) -> Self::Output {
        assert!(self.0 >= rhs.0);
        Cycles(self.0 - rhs.0)
    }
}

impl Tick {
    /// First edge after reset.
    ///
    /// Components that need kick-starting should use this tick to perform initialization.
    pub const INIT: Self = Self(0);

    /// The very last tick that can be tracked by the system.
    ///
    /// Effectively means "never".
    pub const ETERNITY: Self = Self(u64::MAX);

    pub const fn at(cycle: u64) -> Self {
        Self(cycle)
    }

    /// Cycles elapsed since reset.
    pub const fn since_reset(self) -> Cycles {
        Cycles(self.0)
    }
}

pub trait Deadline {
    fn to_tick(self, now: Tick) -> Tick;
}

impl Deadline for Cycles {
    fn to_tick(self, now: Tick) -> Tick {
        now + self
    }
}

impl Deadline for Tick {
    fn to_tick(self, _now: Tick) -> Tick {
        self
    }
}

#[test]
fn test_tick_arithmetic() {
    let t = Tick::INIT + Cycles::new(5);
    assert_eq!(t - Tick::INIT, Cycles::new(5));
    assert_eq!(Cycles::new(3) * 4u32, Cycles::new(12));
    assert_eq!(Tick::ETERNITY + Cycles::ONE, Tick::ETERNITY);
    assert_eq!(format!("{:?}", Tick::ETERNITY), "eternity");
}
