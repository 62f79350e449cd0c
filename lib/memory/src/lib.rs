mod image;
mod map;
mod naive;
mod port;
pub mod testutils;

use std::sync::{Arc, Mutex};

pub use image::{load_image, parse_hex};
pub use map::{MemoryMap, Region, Segment};
pub use naive::NaiveTiming;
pub use port::{MemorySystem, Port, TILE_BYTES};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("address {addr:#x} is outside the {size:#x}-byte address space")]
    OutOfRange { addr: u64, size: u64 },
    #[error("burst of {len} bytes at {addr:#x} crosses the boundary of segment `{segment}`")]
    CrossesBoundary {
        addr: u64,
        len: usize,
        segment: &'static str,
    },
    #[error("segment `{0}` overlaps its predecessor or leaves the address space")]
    BadSegment(&'static str),
    #[error("burst of {0} bytes is longer than a tile")]
    BurstTooLong(usize),
    #[error("image of {len} bytes does not fit into {size:#x}-byte memory")]
    ImageTooLarge { len: usize, size: u64 },
    #[error("line {line}: `{text}` is not a hex byte")]
    BadHexLine { line: usize, text: String },
    #[error("cannot read memory image")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = MemoryError> = std::result::Result<T, E>;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
}

/// A single-byte access as seen on the memory interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Request {
    pub addr: u64,
    pub is_write: bool,
    pub write_data: u8,
}

impl Request {
    pub fn read(addr: u64) -> Self {
        Self {
            addr,
            is_write: false,
            write_data: 0,
        }
    }

    pub fn write(addr: u64, data: u8) -> Self {
        Self {
            addr,
            is_write: true,
            write_data: data,
        }
    }
}

/// Reply to a [`Request`]; `read_data` is zero for writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Response {
    pub read_data: u8,
}

#[trait_variant::make(Send)]
pub trait MemoryTimingModel: Send + Sync {
    /// Account for the time taken by reading one byte.
    async fn read(&self, addr: u64);

    /// Account for the time taken by writing one byte.
    async fn write(&self, addr: u64);
}

#[trait_variant::make(Send)]
pub trait MemoryModel: Send + Sync {
    async fn read(&self, addr: u64) -> u8;

    async fn write(&self, addr: u64, byte: u8);
}

/// Serve one request against `model`, completing after the model's latency.
pub async fn transact<M: MemoryModel + ?Sized>(model: &M, request: Request) -> Response {
    if request.is_write {
        model.write(request.addr, request.write_data).await;
        Response { read_data: 0 }
    } else {
        Response {
            read_data: model.read(request.addr).await,
        }
    }
}

#[async_trait::async_trait]
pub trait ErasedMemoryModel: Send + Sync {
    async fn box_read(&self, addr: u64) -> u8;
    async fn box_write(&self, addr: u64, byte: u8);
}

#[async_trait::async_trait]
impl<T: MemoryModel> ErasedMemoryModel for T {
    async fn box_read(&self, addr: u64) -> u8 {
        self.read(addr).await
    }

    async fn box_write(&self, addr: u64, byte: u8) {
        self.write(addr, byte).await
    }
}

impl<'a> MemoryModel for dyn ErasedMemoryModel + 'a {
    async fn read(&self, addr: u64) -> u8 {
        self.box_read(addr).await
    }

    async fn write(&self, addr: u64, byte: u8) {
        self.box_write(addr, byte).await
    }
}

impl<T: MemoryModel + ?Sized> MemoryModel for Box<T> {
    async fn read(&self, addr: u64) -> u8 {
        T::read(self, addr).await
    }

    async fn write(&self, addr: u64, byte: u8) {
        T::write(self, addr, byte).await
    }
}

impl<T: MemoryModel + ?Sized> MemoryModel for Arc<T> {
    async fn read(&self, addr: u64) -> u8 {
        T::read(self, addr).await
    }

    async fn write(&self, addr: u64, byte: u8) {
        T::write(self, addr, byte).await
    }
}

/// Byte storage for one address space.
pub struct MemoryBacked {
    data: Mutex<Vec<u8>>,
}

impl MemoryBacked {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
        }
    }

    /// Access the raw contents outside simulated time.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.data.lock().unwrap();
        f(&mut guard)
    }
}

impl MemoryModel for MemoryBacked {
    async fn read(&self, addr: u64) -> u8 {
        self.data.lock().unwrap()[addr as usize]
    }

    async fn write(&self, addr: u64, byte: u8) {
        self.data.lock().unwrap()[addr as usize] = byte;
    }
}

/// Combine a data model with an extra timing model.
pub struct WithTiming<T, M> {
    timing: T,
    data: M,
}

impl<T, M> WithTiming<T, M> {
    pub fn new(timing: T, data: M) -> Self {
        WithTiming { timing, data }
    }
}

impl<T: MemoryTimingModel, M: MemoryModel> MemoryModel for WithTiming<T, M> {
    async fn read(&self, addr: u64) -> u8 {
        self.timing.read(addr).await;
        self.data.read(addr).await
    }

    async fn write(&self, addr: u64, byte: u8) {
        self.timing.write(addr).await;
        self.data.write(addr, byte).await
    }
}

// Memory model with utilization statistics
pub struct WithStats<T: ?Sized> {
    statistics: Mutex<Statistics>,
    model: T,
}

impl<T> WithStats<T> {
    pub fn new(model: T) -> Self {
        WithStats {
            statistics: Mutex::new(Statistics::default()),
            model,
        }
    }
}

impl<T: ?Sized> WithStats<T> {
    pub fn statistics(&self) -> Statistics {
        *self.statistics.lock().unwrap()
    }
}

impl<T: MemoryModel + ?Sized> MemoryModel for WithStats<T> {
    async fn read(&self, addr: u64) -> u8 {
        {
            let mut guard = self.statistics.lock().unwrap();
            guard.total_bytes_read += 1;
        }
        self.model.read(addr).await
    }

    async fn write(&self, addr: u64, byte: u8) {
        {
            let mut guard = self.statistics.lock().unwrap();
            guard.total_bytes_written += 1;
        }
        self.model.write(addr, byte).await
    }
}

#[cfg(test)]
mod tests {
    use runtime::{Cycles, Executor, Tick};

    use super::*;

    #[tokio::test]
    async fn transact_reads_back_written_byte() {
        let executor = Executor::new();
        let mem = Arc::new(WithStats::new(WithTiming::new(
            NaiveTiming::new(Cycles::new(2), Cycles::new(1)),
            MemoryBacked::with_capacity(64),
        )));
        let out = {
            let mem = mem.clone();
            executor
                .run(
                    async move {
                        transact(&*mem, Request::write(5, 0xab)).await;
                        transact(&*mem, Request::read(5)).await
                    },
                    Tick::ETERNITY,
                )
                .await
        };
        assert_eq!(out, Some(Response { read_data: 0xab }));
        // One write cycle then two read cycles.
        assert_eq!(executor.now(), Tick::at(3));
        assert_eq!(
            mem.statistics(),
            Statistics {
                total_bytes_read: 1,
                total_bytes_written: 1,
            }
        );
    }

    #[tokio::test]
    async fn erased_model_forwards_accesses() {
        let executor = Executor::new();
        let backing = Arc::new(MemoryBacked::with_capacity(16));
        let erased: Box<dyn ErasedMemoryModel> = Box::new(backing.clone());
        executor
            .run(
                async move {
                    erased.write(3, 9).await;
                },
                Tick::ETERNITY,
            )
            .await;
        assert_eq!(backing.with_data(|d| d[3]), 9);
    }
}
