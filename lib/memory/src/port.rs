use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use runtime::Cycles;

use crate::{
    transact, ErasedMemoryModel, MemoryBacked, MemoryError, MemoryMap, MemoryTimingModel,
    NaiveTiming, Region, Request, Result, Statistics, WithStats, WithTiming,
};

/// Maximum length of a single burst, one buffer tile.
pub const TILE_BYTES: usize = 32;

/// The access port of one address space.
///
/// Bursts are issued as sequential single-byte requests and may not straddle a segment of the
/// memory map.
pub struct Port {
    region: Region,
    map: Arc<MemoryMap>,
    backing: Arc<MemoryBacked>,
    model: WithStats<Box<dyn ErasedMemoryModel>>,
    bursts: AtomicU64,
}

impl Port {
    pub fn new(region: Region, map: Arc<MemoryMap>, timing: impl MemoryTimingModel + 'static) -> Self {
        let backing = Arc::new(MemoryBacked::with_capacity(map.size() as usize));
        let model: Box<dyn ErasedMemoryModel> =
            Box::new(WithTiming::new(timing, backing.clone()));
        Self {
            region,
            map,
            backing,
            model: WithStats::new(model),
            bursts: AtomicU64::new(0),
        }
    }

    fn check(&self, addr: u64, len: usize) -> Result<()> {
        if len > TILE_BYTES {
            return Err(MemoryError::BurstTooLong(len));
        }
        self.map.check_burst(addr, len)
    }

    pub async fn read_burst(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        self.check(addr, len)?;
        self.bursts.fetch_add(1, Ordering::Relaxed);
        let mut bytes = Vec::with_capacity(len);
        for offset in 0..len as u64 {
            let response = transact(&self.model, Request::read(addr + offset)).await;
            bytes.push(response.read_data);
        }
        Ok(bytes)
    }

    pub async fn write_burst(&self, addr: u64, bytes: &[u8]) -> Result<()> {
        self.check(addr, bytes.len())?;
        self.bursts.fetch_add(1, Ordering::Relaxed);
        for (offset, &byte) in bytes.iter().enumerate() {
            transact(&self.model, Request::write(addr + offset as u64, byte)).await;
        }
        Ok(())
    }

    /// Copy `image` into this space starting at address 0, outside simulated time.
    pub fn seed(&self, image: &[u8]) -> Result<()> {
        self.backing.with_data(|data| {
            if image.len() > data.len() {
                return Err(MemoryError::ImageTooLarge {
                    len: image.len(),
                    size: data.len() as u64,
                });
            }
            data[..image.len()].copy_from_slice(image);
            Ok(())
        })
    }

    /// Read memory contents without taking simulated time or touching statistics.
    pub fn peek(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let size = self.map.size();
        let end = addr.checked_add(len as u64).filter(|&end| end <= size);
        let Some(end) = end else {
            return Err(MemoryError::OutOfRange { addr, size });
        };
        Ok(self
            .backing
            .with_data(|data| data[addr as usize..end as usize].to_vec()))
    }

    pub fn statistics(&self) -> Statistics {
        self.model.statistics()
    }

    pub fn bursts(&self) -> u64 {
        self.bursts.load(Ordering::Relaxed)
    }
}

/// The four non-coherent address spaces of the accelerator.
pub struct MemorySystem {
    map: Arc<MemoryMap>,
    ports: Vec<Port>,
}

impl MemorySystem {
    /// Build a system whose ports all use a [`NaiveTiming`] with the given latencies.
    pub fn new(map: MemoryMap, read_latency: Cycles, write_latency: Cycles) -> Self {
        Self::with_timing(map, |_| NaiveTiming::new(read_latency, write_latency))
    }

    pub fn with_timing<T: MemoryTimingModel + 'static>(
        map: MemoryMap,
        mut timing: impl FnMut(Region) -> T,
    ) -> Self {
        let map = Arc::new(map);
        let ports = Region::ALL
            .iter()
            .map(|&region| Port::new(region, map.clone(), timing(region)))
            .collect();
        Self { map, ports }
    }

    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn port(&self, region: Region) -> &Port {
        &self.ports[region.index()]
    }

    /// Write the same image into all four address spaces.
    pub fn seed(&self, image: &[u8]) -> Result<()> {
        for port in &self.ports {
            port.seed(image)?;
        }
        clilog::debug!("seeded {} bytes into every address space", image.len());
        Ok(())
    }
}
