use runtime::{Cycles, Executor};
use tokio::sync::Semaphore;

use crate::MemoryTimingModel;

/// A naive single-port memory timing model with fixed access latency.
///
/// Only one access is in flight at a time; concurrent requesters queue on the port.
pub struct NaiveTiming {
    read_latency: Cycles,
    write_latency: Cycles,
    port: Semaphore,
}

impl NaiveTiming {
    pub fn new(read_latency: Cycles, write_latency: Cycles) -> Self {
        Self {
            read_latency,
            write_latency,
            port: Semaphore::new(1),
        }
    }

    /// Every access completes on the edge after it is issued.
    pub fn single_cycle() -> Self {
        Self::new(Cycles::ONE, Cycles::ONE)
    }
}

impl MemoryTimingModel for NaiveTiming {
    async fn read(&self, _addr: u64) {
        let _port = self.port.acquire().await.unwrap();
        Executor::current().resolve_at(self.read_latency).await;
    }

    async fn write(&self, _addr: u64) {
        let _port = self.port.acquire().await.unwrap();
        Executor::current().resolve_at(self.write_latency).await;
    }
}
