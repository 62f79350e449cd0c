//! Assembly of memory, buffers and units into one simulated core.

use std::sync::Arc;

use buffer::BufferController;
use memory::{MemorySystem, Region, Statistics};
use runtime::{Executor, ExecutorStats, Tick};
use tokio::sync::Mutex;

use crate::config::AcceleratorConfig;
use crate::fetch::{self, RunReport, Sequencer};
use crate::isa::Instruction;
use crate::orchestrator::ExecutionOrchestrator;
use crate::{AccelError, Result};

pub struct Accelerator {
    memory: Arc<MemorySystem>,
    buffers: Arc<BufferController>,
    orchestrator: Arc<Mutex<ExecutionOrchestrator>>,
    last_run: std::sync::Mutex<ExecutorStats>,
}

impl Accelerator {
    pub fn new(config: AcceleratorConfig) -> Result<Self> {
        let (read_latency, write_latency) = config.memory_latency();
        let memory = Arc::new(MemorySystem::new(
            config.memory_map()?,
            read_latency,
            write_latency,
        ));
        let buffers = Arc::new(BufferController::new(config.buffer_config()));
        let orchestrator =
            ExecutionOrchestrator::new(buffers.clone(), memory.clone(), config.timing());
        Ok(Self {
            memory,
            buffers,
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            last_run: std::sync::Mutex::new(ExecutorStats::default()),
        })
    }

    /// Write `image` into all four address spaces.
    pub fn seed(&self, image: &[u8]) -> Result<()> {
        Ok(self.memory.seed(image)?)
    }

    pub fn memory(&self) -> &Arc<MemorySystem> {
        &self.memory
    }

    pub fn buffers(&self) -> &Arc<BufferController> {
        &self.buffers
    }

    /// Row accumulators allocated by GEMV so far.
    pub fn accumulator_allocations(&self) -> Result<u64> {
        let orchestrator = self.orchestrator.try_lock().map_err(|_| AccelError::Busy)?;
        Ok(orchestrator.gemv().accumulator_allocations())
    }

    /// Completion pulses emitted so far.
    pub fn pulses(&self) -> Result<u64> {
        let orchestrator = self.orchestrator.try_lock().map_err(|_| AccelError::Busy)?;
        Ok(orchestrator.pulses())
    }

    /// Executor counters of the most recent simulation.
    pub fn last_run(&self) -> ExecutorStats {
        *self.last_run.lock().unwrap()
    }

    /// Fetch and execute the program in the instruction space until the sentinel.
    ///
    /// Events at cycle `max_cycles` still happen; a run that needs more is abandoned with
    /// [`AccelError::Timeout`]. Abandoning drops the in-flight units and their buffer leases, so
    /// the accelerator can simulate again.
    pub async fn simulate(&self, max_cycles: u64) -> Result<RunReport> {
        let memory = self.memory.clone();
        self.run_on_executor(max_cycles, move |mut orchestrator| async move {
            let mut sequencer = Sequencer::new(memory)?;
            fetch::run_program(&mut orchestrator, &mut sequencer).await
        })
        .await
    }

    /// Execute decoded instructions directly, without going through the instruction space.
    pub async fn execute_all(&self, program: Vec<Instruction>, max_cycles: u64) -> Result<RunReport> {
        self.run_on_executor(max_cycles, move |mut orchestrator| async move {
            fetch::run_instructions(&mut orchestrator, &program).await
        })
        .await
    }

    async fn run_on_executor<F, Fut>(&self, max_cycles: u64, body: F) -> Result<RunReport>
    where
        F: FnOnce(tokio::sync::OwnedMutexGuard<ExecutionOrchestrator>) -> Fut,
        Fut: std::future::Future<Output = Result<RunReport>> + Send + 'static,
    {
        let mut orchestrator = self
            .orchestrator
            .clone()
            .try_lock_owned()
            .map_err(|_| AccelError::Busy)?;
        orchestrator.recover();
        let executor = Executor::new();
        let out = executor.run(body(orchestrator), Tick::at(max_cycles)).await;
        *self.last_run.lock().unwrap() = executor.stats();
        match out {
            Some(report) => report,
            None => {
                clilog::warn!("simulation stopped at {:?}", executor.now());
                Err(AccelError::Timeout(max_cycles))
            }
        }
    }

    /// The first `len` bytes of the store segment.
    pub fn dump_store(&self, len: usize) -> Result<Vec<u8>> {
        let start = self
            .memory
            .map()
            .segment("store")
            .map(|s| s.start)
            .ok_or(memory::MemoryError::BadSegment("store"))?;
        Ok(self.memory.port(Region::Store).peek(start, len)?)
    }

    /// Byte statistics of each address space.
    pub fn memory_statistics(&self) -> Vec<(Region, Statistics)> {
        Region::ALL
            .iter()
            .map(|&region| (region, self.memory.port(region).statistics()))
            .collect()
    }
}
