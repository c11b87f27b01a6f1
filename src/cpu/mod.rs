//! The simulated processor.
//!
//! Two CPU variants share one architectural core:
//! - [`Cpu`]: sequential, one full fetch-decode-execute pass per cycle
//! - [`PipelinedCpu`]: the three stages overlap, with read-after-write
//!   stalls and control-hazard flushes
//!
//! Supporting parts: the [`alu`], the segmented [`memory`], the register
//! file, the [`decode`] step, the throttling [`clock`] and the
//! [`breakpoints`] set.

pub mod alu;
pub mod breakpoints;
pub mod clock;
pub mod core;
pub mod decode;
pub mod execute;
pub mod memory;
pub mod pipeline;
pub mod registers;

#[cfg(test)]
pub(crate) mod testutil;

pub use breakpoints::{BreakpointError, Breakpoints};
pub use clock::{Clock, ClockStatus};
pub use self::core::{Cpu, CpuControls, CpuError};
pub use decode::{decode, DecodeError, InstructionFormat};
pub use memory::{HeapError, MainMemory, MemoryError, StackError};
pub use pipeline::PipelinedCpu;
pub use registers::RegisterFile;
