//! Top-level dispatch state machine.

use std::sync::Arc;

use buffer::BufferController;
use memory::MemorySystem;
use runtime::{Cycles, Executor};

use crate::isa::{Instruction, Opcode};
use crate::units::{
    start_unit, GemvEngine, GemvParams, LoadParams, LoadUnit, ReluParams, ReluUnit,
    StoreParams, StoreUnit, UnitReport,
};
use crate::{Result, Timing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Dispatch(Instruction),
    WaitLoadV,
    WaitLoadM,
    WaitGemv,
    WaitRelu,
    WaitStore,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A decoded instruction is presented.
    Start(Instruction),
    /// The dispatch cycle has elapsed.
    Decoded,
    /// The started unit raised done.
    UnitDone,
    /// The completion pulse has been emitted.
    Pulse,
}

impl OrchestratorState {
    pub fn next(self, event: Event) -> Self {
        use OrchestratorState::*;
        match (self, event) {
            (Idle, Event::Start(inst)) => Dispatch(inst),
            (Dispatch(inst), Event::Decoded) => match inst.opcode {
                Opcode::LoadV => WaitLoadV,
                Opcode::LoadM => WaitLoadM,
                Opcode::Gemv => WaitGemv,
                Opcode::Relu => WaitRelu,
                Opcode::Store => WaitStore,
                Opcode::Nop | Opcode::Invalid(_) => Complete,
            },
            (WaitLoadV | WaitLoadM | WaitGemv | WaitRelu | WaitStore, Event::UnitDone) => Complete,
            (Complete, Event::Pulse) => Idle,
            (state, _) => state,
        }
    }

    pub fn is_idle(&self) -> bool {
        *self == OrchestratorState::Idle
    }
}

/// Outcome of one dispatched instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub instruction: Instruction,
    /// Cycles from dispatch to the end of the completion pulse.
    pub cycles: Cycles,
    pub tiles: u64,
}

pub struct ExecutionOrchestrator {
    load_v: Arc<LoadUnit>,
    load_m: Arc<LoadUnit>,
    gemv: Arc<GemvEngine>,
    relu: Arc<ReluUnit>,
    store: Arc<StoreUnit>,
    timing: Timing,
    state: OrchestratorState,
    pulses: u64,
}

impl ExecutionOrchestrator {
    pub fn new(buffers: Arc<BufferController>, memory: Arc<MemorySystem>, timing: Timing) -> Self {
        Self {
            load_v: Arc::new(LoadUnit::vector(buffers.clone(), memory.clone())),
            load_m: Arc::new(LoadUnit::matrix(buffers.clone(), memory.clone())),
            gemv: Arc::new(GemvEngine::new(buffers.clone(), timing)),
            relu: Arc::new(ReluUnit::new(buffers.clone(), timing)),
            store: Arc::new(StoreUnit::new(buffers, memory)),
            timing,
            state: OrchestratorState::Idle,
            pulses: 0,
        }
    }

    /// Completion pulses emitted so far.
    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    pub fn gemv(&self) -> &GemvEngine {
        &self.gemv
    }

    /// Return to idle after a run that was abandoned mid-instruction.
    pub fn recover(&mut self) {
        if !self.state.is_idle() {
            clilog::debug!("discarding abandoned state {:?}", self.state);
            self.state = OrchestratorState::Idle;
        }
    }

    /// Run one instruction from dispatch to completion pulse.
    ///
    /// A failing unit leaves the orchestrator idle and returns its error without a pulse.
    pub async fn execute(&mut self, inst: Instruction) -> Result<Completion> {
        let begin = Executor::current().now();
        self.state = self.state.next(Event::Start(inst));
        runtime::cycle!(self.timing.dispatch.count());
        self.state = self.state.next(Event::Decoded);

        let report = match self.wait_unit(inst).await {
            Ok(report) => report,
            Err(e) => {
                self.state = OrchestratorState::Idle;
                return Err(e);
            }
        };
        self.state = self.state.next(Event::UnitDone);

        runtime::cycle!(self.timing.completion_pulse.count());
        self.pulses += 1;
        self.state = self.state.next(Event::Pulse);

        let cycles = Executor::current().now() - begin;
        clilog::debug!("{} done in {:?}, {} tiles", inst, cycles, report.tiles);
        Ok(Completion {
            instruction: inst,
            cycles,
            tiles: report.tiles,
        })
    }

    async fn wait_unit(&self, inst: Instruction) -> Result<UnitReport> {
        let dest = inst.dest as usize;
        let length = inst.length_or_cols as usize;
        let addr = inst.addr as u64;
        let done = match self.state {
            OrchestratorState::WaitLoadV => start_unit(
                &self.load_v,
                LoadParams {
                    dest,
                    addr,
                    elements: length,
                },
            ),
            OrchestratorState::WaitLoadM => start_unit(
                &self.load_m,
                LoadParams {
                    dest,
                    addr,
                    elements: inst.rows as usize * length,
                },
            ),
            OrchestratorState::WaitGemv => start_unit(
                &self.gemv,
                GemvParams {
                    dest,
                    w: inst.w_id as usize,
                    x: inst.x_id as usize,
                    b: inst.b_id as usize,
                    rows: inst.rows as usize,
                    cols: length,
                },
            ),
            OrchestratorState::WaitRelu => start_unit(
                &self.relu,
                ReluParams {
                    dest,
                    src: inst.x_id as usize,
                    length,
                },
            ),
            OrchestratorState::WaitStore => start_unit(
                &self.store,
                StoreParams {
                    src: dest,
                    addr,
                    length,
                },
            ),
            _ => {
                if let Opcode::Invalid(raw) = inst.opcode {
                    clilog::warn!("skipping invalid opcode {:#04x} in {:#018x}", raw, inst.encode());
                }
                return Ok(UnitReport::default());
            }
        };
        done.await?
    }
}
