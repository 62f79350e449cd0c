//! Sequential instruction fetch from the instruction address space.

use std::sync::Arc;

use memory::{MemoryError, MemorySystem, Region, Segment};
use runtime::{Cycles, Executor};

use crate::isa::{Instruction, Opcode};
use crate::orchestrator::{Completion, ExecutionOrchestrator};
use crate::Result;

/// Size of one instruction word in bytes.
pub const WORD_BYTES: u64 = 8;

/// Summary of one program run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Instructions dispatched, NOPs and skipped ones included.
    pub executed: u64,
    /// Invalid opcodes treated as no-ops.
    pub skipped: u64,
    pub cycles: Cycles,
    pub completions: Vec<Completion>,
}

impl RunReport {
    pub fn record(&mut self, completion: Completion) {
        self.executed += 1;
        if let Opcode::Invalid(_) = completion.instruction.opcode {
            self.skipped += 1;
        }
        self.completions.push(completion);
    }
}

/// Reads big-endian words from the start of the instruction segment.
pub struct Sequencer {
    memory: Arc<MemorySystem>,
    pc: u64,
    end: u64,
}

impl Sequencer {
    pub fn new(memory: Arc<MemorySystem>) -> Result<Self> {
        let Some(&Segment { start, end, .. }) = memory.map().segment("instructions") else {
            return Err(MemoryError::BadSegment("instructions").into());
        };
        Ok(Self {
            memory,
            pc: start,
            end,
        })
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Fetch and decode the next word; `None` at the sentinel or the end of the segment.
    pub async fn fetch(&mut self) -> Result<Option<Instruction>> {
        if self.pc + WORD_BYTES > self.end {
            return Ok(None);
        }
        let bytes = self
            .memory
            .port(Region::Instructions)
            .read_burst(self.pc, WORD_BYTES as usize)
            .await?;
        let mut word = [0u8; WORD_BYTES as usize];
        word.copy_from_slice(&bytes);
        let word = u64::from_be_bytes(word);
        let inst = Instruction::decode(word);
        if inst.is_sentinel() {
            clilog::debug!("sentinel at {:#x}", self.pc);
            return Ok(None);
        }
        self.pc += WORD_BYTES;
        Ok(Some(inst))
    }
}

/// Fetch and execute until the program terminates.
pub async fn run_program(
    orchestrator: &mut ExecutionOrchestrator,
    sequencer: &mut Sequencer,
) -> Result<RunReport> {
    let begin = Executor::current().now();
    let mut report = RunReport::default();
    while let Some(inst) = sequencer.fetch().await? {
        clilog::debug!("execute [{:#x}] {}", sequencer.pc() - WORD_BYTES, inst);
        report.record(orchestrator.execute(inst).await?);
    }
    report.cycles = Executor::current().now() - begin;
    Ok(report)
}

/// Execute already decoded instructions, bypassing fetch.
pub async fn run_instructions(
    orchestrator: &mut ExecutionOrchestrator,
    program: &[Instruction],
) -> Result<RunReport> {
    let begin = Executor::current().now();
    let mut report = RunReport::default();
    for &inst in program {
        report.record(orchestrator.execute(inst).await?);
    }
    report.cycles = Executor::current().now() - begin;
    Ok(report)
}

/// Write encoded instructions into `image` at `base`, followed by the sentinel.
pub fn place_program(image: &mut Vec<u8>, base: u64, program: &[Instruction]) {
    place_words(image, base, program.iter().map(Instruction::encode));
}

/// Write raw instruction words into `image` at `base`, followed by the sentinel.
pub fn place_words(image: &mut Vec<u8>, base: u64, words: impl IntoIterator<Item = u64>) {
    let size = WORD_BYTES as usize;
    for (i, word) in words.into_iter().chain(std::iter::once(0)).enumerate() {
        let at = base as usize + i * size;
        if image.len() < at + size {
            image.resize(at + size, 0);
        }
        image[at..at + size].copy_from_slice(&word.to_be_bytes());
    }
}
