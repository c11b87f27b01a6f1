//! The three-stage pipelined CPU.
//!
//! Fetch, decode and execute overlap: in one cycle the statement fetched
//! two cycles ago executes while its successors sit in the decode and
//! fetch latches. Decode resolves register values, so an instruction whose
//! sources are written by the instruction directly ahead of it must wait a
//! cycle (a read-after-write stall: decode holds still and a bubble enters
//! the execute slot). A jump or taken branch discovered at execute flushes
//! the two younger latches (a control hazard) and refetches from the new
//! program counter.
//!
//! `residual` counts the synthetic no-ops currently flowing towards the
//! execute stage: a stall contributes one, a flush two, and each cycle
//! consumes one. Architectural results are identical to the sequential
//! CPU's; only timing and the emitted pipeline events differ.
//!
//! When the program counter passes the last statement the pipeline drains
//! for three cycles so in-flight work completes; a jump executed during
//! the drain cancels it. A drain that completes without an exit syscall
//! reports the same friendly problem as the sequential CPU.

use std::sync::Arc;

use crate::cpu::breakpoints::Breakpoints;
use crate::cpu::core::{
    run_to_completion, CpuControls, CpuCore, CpuError, CycleStrategy, Flow,
    END_OF_PROGRAM_MESSAGE,
};
use crate::cpu::decode::{decode, InstructionFormat};
use crate::cpu::execute::ExecFlow;
use crate::cpu::registers::RegisterFile;
use crate::events::{EventSink, HazardKind, SimulationEvent, Stage};
use crate::io::SimIo;
use crate::program::{Address, Opcode, Program, Register, Statement};

/// Cycles needed for the last fetched statement to leave the pipeline.
const DRAIN_CYCLES: u32 = 3;

/// The pipelined CPU. Shares all architectural state with the sequential
/// variant through [`CpuCore`]; adds only the inter-stage latches.
pub struct PipelinedCpu {
    core: CpuCore,
    /// Fetched statement awaiting decode.
    if_latch: Option<(Address, Statement)>,
    /// Decoded instruction awaiting execute, with its source line.
    id_latch: Option<(Address, usize, InstructionFormat)>,
    /// Synthetic no-ops still flowing towards the execute stage.
    residual: u32,
    /// Consecutive cycles spent draining at the end of the program.
    drained: u32,
    /// Breakpoint already honoured at this fetch address. A stall keeps
    /// the fetch program counter in place, and the breakpoint must not
    /// fire again while the same address is replayed.
    paused_at: Option<Address>,
}

impl PipelinedCpu {
    /// A pipelined CPU with `program` loaded and ready to run.
    pub fn new(
        program: Arc<Program>,
        io: Arc<dyn SimIo>,
        events: EventSink,
    ) -> Result<PipelinedCpu, CpuError> {
        Ok(PipelinedCpu {
            core: CpuCore::new(program, io, events)?,
            if_latch: None,
            id_latch: None,
            residual: 0,
            drained: 0,
            paused_at: None,
        })
    }

    /// Load a different program, resetting all execution state. The
    /// breakpoint set survives.
    pub fn load_program(&mut self, program: Arc<Program>) -> Result<(), CpuError> {
        self.core.load_program(program)?;
        self.clear_pipeline();
        Ok(())
    }

    /// Run the loaded program to completion on the calling thread.
    pub fn run_program(&mut self) -> Result<(), CpuError> {
        run_to_completion(self)
    }

    /// A handle for steering this run from other threads.
    pub fn controls(&self) -> CpuControls {
        self.core.controls_handle()
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.core.registers
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.core.breakpoints
    }

    pub fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.core.breakpoints
    }

    pub fn pc(&self) -> Address {
        self.core.pc
    }

    pub fn cycles(&self) -> u64 {
        self.core.cycles
    }

    /// Synthetic no-ops still in flight towards the execute stage.
    pub fn residual_noops(&self) -> u32 {
        self.residual
    }

    fn clear_pipeline(&mut self) {
        self.if_latch = None;
        self.id_latch = None;
        self.residual = 0;
        self.drained = 0;
        self.paused_at = None;
    }

    /// Registers the instruction entering execute will write this cycle.
    ///
    /// `syscall`'s write set depends on its service code, read from the
    /// current `$v0`: the input services (read int, sbrk, read char) write
    /// `$v0` back.
    fn written_this_cycle(&self, instruction: &InstructionFormat) -> Vec<Register> {
        let mut written = instruction.registers_written();
        if let InstructionFormat::Special { op: Opcode::Syscall } = instruction {
            let service = self.core.registers.get(Register::V0).to_signed();
            if matches!(service, 5 | 9 | 12) {
                written.push(Register::V0);
            }
        }
        written
    }
}

impl CycleStrategy for PipelinedCpu {
    fn core(&mut self) -> &mut CpuCore {
        &mut self.core
    }

    fn reset(&mut self) {
        self.clear_pipeline();
    }

    fn run_cycle(&mut self) -> Result<Flow, CpuError> {
        if self.core.breakpoints.should_break(self.core.pc)? {
            // a stall suppresses the fetch, leaving the program counter in
            // place; pause only on the first cycle at this address
            if self.paused_at != Some(self.core.pc) {
                self.paused_at = Some(self.core.pc);
                if self.core.pause_here() == Flow::Halt {
                    return Ok(Flow::Halt);
                }
            }
        } else {
            self.paused_at = None;
        }

        // one in-flight synthetic no-op reaches execute this cycle
        if self.residual > 0 {
            self.residual -= 1;
        }

        // the instruction entering execute; taken now so decode sees the
        // latch as free
        let executing = self.id_latch.take();

        // ---- decode stage ----
        let mut decoded = None;
        if let Some((address, statement)) = self.if_latch.take() {
            let stalled = match &executing {
                Some((_, _, instruction)) => {
                    let written = self.written_this_cycle(instruction);
                    statement
                        .registers_read()
                        .iter()
                        .any(|register| written.contains(register))
                }
                None => false,
            };
            if stalled {
                // decode would read a register the executing instruction
                // has not written yet; hold the statement and let a bubble
                // flow instead
                self.core.events.emit(SimulationEvent::Hazard {
                    kind: HazardKind::ReadAfterWrite,
                });
                self.residual = 1;
                self.if_latch = Some((address, statement));
            } else {
                self.core.events.emit(SimulationEvent::StageEntered {
                    stage: Stage::Decode,
                    address,
                });
                let instruction = decode(
                    &statement,
                    &self.core.registers,
                    &self.core.program.labels,
                    address.offset(4),
                )?;
                self.core.events.emit(SimulationEvent::InstructionDecoded {
                    opcode: statement.opcode,
                    address,
                });
                self.id_latch = Some((address, statement.line_number, instruction));
                decoded = Some(address);
            }
        }

        // ---- fetch stage ----
        let mut fetched = None;
        if self.if_latch.is_none() {
            if self.core.pc == self.core.last_address.offset(4) {
                self.drained += 1;
            } else {
                let address = self.core.pc;
                self.core.events.emit(SimulationEvent::StageEntered {
                    stage: Stage::Fetch,
                    address,
                });
                let statement = self.core.memory.read_from_text(address)?.clone();
                self.core.current_line = Some(statement.line_number);
                self.if_latch = Some((address, statement));
                self.core.pc = address.offset(4);
                self.drained = 0;
                fetched = Some(address);
            }
        }

        // ---- execute stage ----
        let mut executed = None;
        let mut halt = false;
        let mut pause = false;
        if let Some((address, line, instruction)) = executing {
            self.core.events.emit(SimulationEvent::StageEntered {
                stage: Stage::Execute,
                address,
            });
            self.core.current_line = Some(line);
            let flow = self.core.execute(instruction)?;
            executed = Some(address);
            self.core.annotation_due(address);
            match flow {
                ExecFlow::Continue => {}
                ExecFlow::Jumped => {
                    // the two younger latches hold wrong-path work
                    self.if_latch = None;
                    self.id_latch = None;
                    self.core.events.emit(SimulationEvent::Hazard {
                        kind: HazardKind::Control,
                    });
                    self.residual = 2;
                    self.drained = 0;
                }
                ExecFlow::Halt => halt = true,
                ExecFlow::Break => pause = true,
            }
        }

        self.core.events.emit(SimulationEvent::PipelineState {
            fetched,
            decoded,
            executed,
        });

        self.core.clock.wait_for_next_tick();

        if halt {
            // the halting cycle still counts
            self.core.cycles += 1;
            return Ok(Flow::Halt);
        }
        if pause && self.core.pause_here() == Flow::Halt {
            self.core.cycles += 1;
            return Ok(Flow::Halt);
        }
        if self.drained >= DRAIN_CYCLES {
            self.core.events.emit(SimulationEvent::Problem {
                message: END_OF_PROGRAM_MESSAGE.to_string(),
                line: self.core.current_line,
            });
            self.core.cycles += 1;
            return Ok(Flow::Halt);
        }

        Ok(self.core.finish_cycle())
    }
}

// ============================================================================
// Tests
// ============================================================================
