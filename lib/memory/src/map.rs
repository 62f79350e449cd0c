use crate::{MemoryError, Result};

/// One of the four independent address spaces of the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Instructions,
    VectorLoads,
    MatrixLoads,
    Store,
}

impl Region {
    pub const ALL: [Region; 4] = [
        Region::Instructions,
        Region::VectorLoads,
        Region::MatrixLoads,
        Region::Store,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Region::Instructions => "instructions",
            Region::VectorLoads => "vector loads",
            Region::MatrixLoads => "matrix loads",
            Region::Store => "store",
        }
    }
}

/// A contiguous range `[start, end)` of the address map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub name: &'static str,
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub const fn new(name: &'static str, start: u64, end: u64) -> Self {
        Self { name, start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, addr: u64) -> bool {
        (self.start..self.end).contains(&addr)
    }
}

/// Address map shared by the four address spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    size: u64,
    segments: Vec<Segment>,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self {
            size: 0x30000,
            segments: vec![
                Segment::new("instructions", 0x000000, 0x000700),
                Segment::new("vectors", 0x000700, 0x010700),
                Segment::new("matrices", 0x010700, 0x013000),
                Segment::new("biases", 0x013000, 0x020000),
                Segment::new("store", 0x020000, 0x030000),
            ],
        }
    }
}

impl MemoryMap {
    /// Build a map from segments listed in ascending address order.
    pub fn new(size: u64, segments: Vec<Segment>) -> Result<Self> {
        let mut last_end = 0;
        for segment in &segments {
            if segment.start < last_end || segment.end < segment.start || segment.end > size {
                return Err(MemoryError::BadSegment(segment.name));
            }
            last_end = segment.end;
        }
        Ok(Self { size, segments })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn segment_of(&self, addr: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(addr))
    }

    /// Check that a burst of `len` bytes at `addr` stays inside one segment.
    pub fn check_burst(&self, addr: u64, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let last = addr + len as u64 - 1;
        if last >= self.size {
            return Err(MemoryError::OutOfRange {
                addr: last,
                size: self.size,
            });
        }
        let segment = self
            .segment_of(addr)
            .ok_or(MemoryError::OutOfRange {
                addr,
                size: self.size,
            })?;
        if !segment.contains(last) {
            return Err(MemoryError::CrossesBoundary {
                addr,
                len,
                segment: segment.name,
            });
        }
        Ok(())
    }
}
