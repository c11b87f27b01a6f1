//! # mipsim
//!
//! The simulation core of a small-subset MIPS teaching simulator.
//!
//! An external assembler supplies a [`Program`] (statements, data image,
//! labels, annotations); this crate executes it on a sequential or a
//! three-stage pipelined CPU, talking to the outside world only through a
//! [`SimIo`] implementation and a single [`SimulationEvent`] channel. The
//! pipelined CPU produces the same architectural results as the
//! sequential one while also surfacing stalls, flushes and per-cycle
//! stage occupancy for visualisation.

pub mod cpu;
pub mod events;
pub mod io;
pub mod program;
pub mod word;

// Re-export commonly used types
pub use cpu::{Cpu, CpuControls, CpuError, PipelinedCpu};
pub use events::{EventSink, SimulationEvent};
pub use io::{BufferIo, ConsoleIo, IoStream, SimIo};
pub use program::{Address, Annotation, Opcode, Operand, Program, Register, Statement};
pub use word::Word;
