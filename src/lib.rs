//! Cycle-level simulator of an int8 GEMV inference core.
//!
//! Instructions are fetched from the instruction address space and dispatched by the
//! [`ExecutionOrchestrator`] to tile-streaming units that share one [`buffer::BufferController`].
//! Simulated time is kept by the [`runtime`] executor.

pub mod accelerator;
pub mod config;
mod error;
pub mod fetch;
pub mod isa;
pub mod orchestrator;
pub mod units;

pub use accelerator::Accelerator;
pub use config::{load_config_from_file, AcceleratorConfig, Timing};
pub use error::{AccelError, Result};
pub use fetch::RunReport;
pub use isa::{Instruction, Opcode};
pub use orchestrator::{Completion, ExecutionOrchestrator};
