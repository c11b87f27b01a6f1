//! The CPU proper: shared state, the run loop, and the sequential cycle.
//!
//! [`CpuCore`] holds everything both CPU variants share: registers, memory,
//! the program, the clock, IO, the event sink and the breakpoint set. The
//! sequential [`Cpu`] drives one full fetch-decode-execute pass per cycle;
//! the pipelined variant in [`crate::cpu::pipeline`] overlaps the stages
//! over the same core.
//!
//! A run executes on the calling thread. Other threads steer it through a
//! [`CpuControls`] handle; their requests take effect at suspension points
//! between (and at defined places within) cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::cpu::alu::AluError;
use crate::cpu::breakpoints::{BreakpointError, Breakpoints};
use crate::cpu::clock::Clock;
use crate::cpu::decode::{decode, DecodeError};
use crate::cpu::execute::ExecFlow;
use crate::cpu::memory::{MainMemory, MemoryError};
use crate::cpu::registers::RegisterFile;
use crate::events::{EventSink, SimulationEvent, Stage};
use crate::io::SimIo;
use crate::program::{Address, Program, Register};
use crate::word::Word;

/// Reported when control falls off the end of the text segment.
pub(crate) const END_OF_PROGRAM_MESSAGE: &str =
    "the program ran past its last statement; it probably forgot to exit \
     cleanly (call syscall with $v0 = 10)";

/// Faults that end a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("memory fault: {0}")]
    Memory(#[from] MemoryError),
    #[error("decode fault: {0}")]
    Decode(#[from] DecodeError),
    #[error("arithmetic fault: {0}")]
    Alu(#[from] AluError),
    #[error("breakpoint fault: {0}")]
    Breakpoint(#[from] BreakpointError),
    #[error("unknown syscall service code {0}")]
    UnknownSyscall(i64),
    #[error("malformed '{0}' instruction reached the executor")]
    Malformed(crate::program::Opcode),
    #[error("program has no statements")]
    EmptyProgram,
    #[error("program has no 'main' label to start from")]
    NoEntryPoint,
}

/// What the run loop should do after a cycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Flow {
    Continue,
    Halt,
}

/// The externally requested run state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RunRequest {
    Run,
    Pause,
    Stop,
}

struct Controls {
    request: Mutex<RunRequest>,
    changed: Condvar,
    break_after_cycle: AtomicBool,
}

// ============================================================================
// CpuControls: the cross-thread handle
// ============================================================================

/// A clone-able handle for steering a run from other threads.
///
/// All methods are asynchronous requests: they return immediately and take
/// effect at the run's next suspension point. [`CpuControls::stop`] also
/// cancels any blocking read so a program waiting on input winds down too.
#[derive(Clone)]
pub struct CpuControls {
    controls: Arc<Controls>,
    clock: Clock,
    io: Arc<dyn SimIo>,
    events: EventSink,
}

impl CpuControls {
    /// Ask the run to pause before its next cycle.
    ///
    /// Also pauses the clock, so a throttled run blocked in a tick-wait
    /// reacts without waiting out the period.
    pub fn pause(&self) {
        let mut request = self.lock();
        if *request == RunRequest::Run {
            *request = RunRequest::Pause;
        }
        drop(request);
        self.clock.pause();
        self.controls.changed.notify_all();
    }

    /// Resume a paused run.
    pub fn resume(&self) {
        let mut request = self.lock();
        if *request == RunRequest::Pause {
            *request = RunRequest::Run;
        }
        drop(request);
        self.clock.resume();
        self.controls.changed.notify_all();
    }

    /// Run exactly one more cycle, then pause again.
    pub fn step(&self) {
        self.controls.break_after_cycle.store(true, Ordering::SeqCst);
        self.resume();
    }

    /// End the run. Safe to call at any time, including mid-read.
    pub fn stop(&self) {
        *self.lock() = RunRequest::Stop;
        self.controls.changed.notify_all();
        self.io.cancel_read();
        self.clock.stop();
    }

    /// Change the cycle frequency, in cycles per second. Zero or negative
    /// means unthrottled.
    pub fn set_cycle_freq(&self, freq: f64) {
        let period = if freq > 0.0 {
            Duration::from_secs_f64(1.0 / freq)
        } else {
            Duration::ZERO
        };
        self.clock.set_period(period);
        self.events.emit(SimulationEvent::SpeedChanged { freq });
    }

    /// The current cycle frequency; zero means unthrottled.
    pub fn cycle_freq(&self) -> f64 {
        let period = self.clock.period();
        if period.is_zero() {
            0.0
        } else {
            1.0 / period.as_secs_f64()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunRequest> {
        self.controls.request.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// CpuCore: state shared by both CPU variants
// ============================================================================

/// Register, memory and control state shared by the sequential and
/// pipelined CPUs.
pub struct CpuCore {
    pub(crate) registers: RegisterFile,
    pub(crate) memory: MainMemory,
    pub(crate) program: Arc<Program>,
    pub(crate) pc: Address,
    pub(crate) last_address: Address,
    pub(crate) cycles: u64,
    pub(crate) clock: Clock,
    pub(crate) io: Arc<dyn SimIo>,
    pub(crate) events: EventSink,
    pub(crate) breakpoints: Breakpoints,
    /// Source line of the most recently fetched statement, for problem
    /// reports.
    pub(crate) current_line: Option<usize>,
    controls: Arc<Controls>,
}

impl CpuCore {
    pub(crate) fn new(
        program: Arc<Program>,
        io: Arc<dyn SimIo>,
        events: EventSink,
    ) -> Result<CpuCore, CpuError> {
        let mut core = CpuCore {
            registers: RegisterFile::new(),
            memory: MainMemory::new(&program),
            program: Arc::clone(&program),
            pc: Address::new(0),
            last_address: Address::new(0),
            cycles: 0,
            clock: Clock::new(Duration::ZERO),
            io,
            events,
            breakpoints: Breakpoints::new(),
            current_line: None,
            controls: Arc::new(Controls {
                request: Mutex::new(RunRequest::Run),
                changed: Condvar::new(),
                break_after_cycle: AtomicBool::new(false),
            }),
        };
        core.load_program(program)?;
        Ok(core)
    }

    /// Replace the loaded program and reset all execution state.
    /// Breakpoints survive and are re-resolved against the new layout.
    pub(crate) fn load_program(&mut self, program: Arc<Program>) -> Result<(), CpuError> {
        let last_address = program.last_address().ok_or(CpuError::EmptyProgram)?;
        let entry_point = program.entry_point().ok_or(CpuError::NoEntryPoint)?;
        self.memory = MainMemory::new(&program);
        self.registers.clear();
        self.breakpoints.specify_program(&program);
        self.last_address = last_address;
        self.pc = entry_point;
        self.cycles = 0;
        self.current_line = None;
        self.events.emit(SimulationEvent::ProgramLoaded {
            name: program.name.clone(),
        });
        self.write_register(Register::Sp, program.initial_sp);
        self.write_register(Register::Gp, program.initial_gp);
        self.program = program;
        Ok(())
    }

    /// Write a register and announce the change.
    pub(crate) fn write_register(&mut self, register: Register, value: Word) {
        self.registers.set(register, value);
        self.events
            .emit(SimulationEvent::RegisterChanged { register, value });
    }

    /// Announce the annotation bound to `address`, if any.
    pub(crate) fn annotation_due(&self, address: Address) {
        if let Some(annotation) = self.program.annotations.get(&address) {
            self.events.emit(SimulationEvent::AnnotationDue {
                annotation: annotation.clone(),
                address: Some(address),
            });
        }
    }

    /// Honour any pending pause or stop request.
    ///
    /// Returns [`Flow::Halt`] when the run should end. A pause blocks here
    /// (with the clock held) until another thread resumes or stops.
    pub(crate) fn suspension_point(&mut self) -> Flow {
        let controls = Arc::clone(&self.controls);
        let mut request = controls.request.lock().unwrap_or_else(|e| e.into_inner());
        match *request {
            RunRequest::Stop => return Flow::Halt,
            RunRequest::Run => return Flow::Continue,
            RunRequest::Pause => {}
        }
        self.clock.pause();
        self.events.emit(SimulationEvent::Paused);
        while *request == RunRequest::Pause {
            request = controls
                .changed
                .wait(request)
                .unwrap_or_else(|e| e.into_inner());
        }
        if *request == RunRequest::Stop {
            return Flow::Halt;
        }
        self.events.emit(SimulationEvent::Resumed);
        self.clock.resume();
        Flow::Continue
    }

    /// Pause right here (breakpoint or `break`), then wait like
    /// [`CpuCore::suspension_point`].
    pub(crate) fn pause_here(&mut self) -> Flow {
        {
            let mut request = self
                .controls
                .request
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if *request == RunRequest::Run {
                *request = RunRequest::Pause;
            }
        }
        self.suspension_point()
    }

    /// One cycle just finished; pause if single-stepping.
    pub(crate) fn finish_cycle(&mut self) -> Flow {
        self.cycles += 1;
        if self.controls.break_after_cycle.swap(false, Ordering::SeqCst) {
            return self.pause_here();
        }
        Flow::Continue
    }

    pub(crate) fn controls_handle(&self) -> CpuControls {
        CpuControls {
            controls: Arc::clone(&self.controls),
            clock: self.clock.clone(),
            io: Arc::clone(&self.io),
            events: self.events.clone(),
        }
    }
}

// ============================================================================
// The shared run loop
// ============================================================================

/// One CPU variant's per-cycle behaviour, driven by [`run_to_completion`].
pub(crate) trait CycleStrategy {
    fn core(&mut self) -> &mut CpuCore;
    /// Clear per-run state (pipeline latches) before the first cycle.
    fn reset(&mut self) {}
    fn run_cycle(&mut self) -> Result<Flow, CpuError>;
}

/// Drive `cpu` until it halts, fails, or is stopped externally.
///
/// Emits `Started` first and `Stopped` last; a fault is announced as a
/// `Problem` event and also returned to the caller.
pub(crate) fn run_to_completion<C: CycleStrategy>(cpu: &mut C) -> Result<(), CpuError> {
    {
        let core = cpu.core();
        {
            let mut request = core.controls.request.lock().unwrap_or_else(|e| e.into_inner());
            *request = RunRequest::Run;
        }
        core.controls.break_after_cycle.store(false, Ordering::SeqCst);
        core.clock.start();
        core.events.emit(SimulationEvent::Started);
        if let Some(annotation) = &core.program.init_annotation {
            core.events.emit(SimulationEvent::AnnotationDue {
                annotation: annotation.clone(),
                address: None,
            });
        }
    }
    cpu.reset();

    let result = loop {
        if cpu.core().suspension_point() == Flow::Halt {
            break Ok(());
        }
        match cpu.run_cycle() {
            Ok(Flow::Continue) => {}
            Ok(Flow::Halt) => break Ok(()),
            Err(error) => {
                let core = cpu.core();
                core.events.emit(SimulationEvent::Problem {
                    message: error.to_string(),
                    line: core.current_line,
                });
                break Err(error);
            }
        }
    };

    let core = cpu.core();
    core.clock.stop();
    core.events.emit(SimulationEvent::Stopped);
    result
}

// ============================================================================
// The sequential CPU
// ============================================================================

/// The non-pipelined CPU: each cycle runs fetch, decode and execute to
/// completion for a single statement.
pub struct Cpu {
    core: CpuCore,
}

impl Cpu {
    /// A CPU with `program` loaded and ready to run.
    pub fn new(
        program: Arc<Program>,
        io: Arc<dyn SimIo>,
        events: EventSink,
    ) -> Result<Cpu, CpuError> {
        Ok(Cpu { core: CpuCore::new(program, io, events)? })
    }

    /// Load a different program, resetting registers, memory and the
    /// program counter. The breakpoint set survives.
    pub fn load_program(&mut self, program: Arc<Program>) -> Result<(), CpuError> {
        self.core.load_program(program)
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
}

impl CycleStrategy for Cpu {
    fn core(&mut self) -> &mut CpuCore {
        &mut self.core
    }

    fn run_cycle(&mut self) -> Result<Flow, CpuError> {
        let core = &mut self.core;

        if core.breakpoints.should_break(core.pc)? && core.pause_here() == Flow::Halt {
            return Ok(Flow::Halt);
        }

        let statement_address = core.pc;
        core.events.emit(SimulationEvent::StageEntered {
            stage: Stage::Fetch,
            address: statement_address,
        });
        let statement = core.memory.read_from_text(core.pc)?.clone();
        core.current_line = Some(statement.line_number);
        core.pc = core.pc.offset(4);

        core.events.emit(SimulationEvent::StageEntered {
            stage: Stage::Decode,
            address: statement_address,
        });
        let instruction = decode(
            &statement,
            &core.registers,
            &core.program.labels,
            core.pc,
        )?;
        core.events.emit(SimulationEvent::InstructionDecoded {
            opcode: statement.opcode,
            address: statement_address,
        });

        core.events.emit(SimulationEvent::StageEntered {
            stage: Stage::Execute,
            address: statement_address,
        });
        let flow = core.execute(instruction)?;
        core.annotation_due(statement_address);

        core.clock.wait_for_next_tick();

        match flow {
            ExecFlow::Halt => {
                // the halting cycle still counts
                core.cycles += 1;
                return Ok(Flow::Halt);
            }
            ExecFlow::Break => {
                if core.pause_here() == Flow::Halt {
                    core.cycles += 1;
                    return Ok(Flow::Halt);
                }
            }
            ExecFlow::Continue | ExecFlow::Jumped => {}
        }

        if core.pc == core.last_address.offset(4) {
            core.events.emit(SimulationEvent::Problem {
                message: END_OF_PROGRAM_MESSAGE.to_string(),
                line: core.current_line,
            });
            core.cycles += 1;
            return Ok(Flow::Halt);
        }

        Ok(core.finish_cycle())
    }
}

// ============================================================================
// Tests
// ============================================================================
