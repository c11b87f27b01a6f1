//! The outward event channel.
//!
//! Everything observable about a run leaves the core as a
//! [`SimulationEvent`] on a single fire-and-forget channel: lifecycle
//! transitions, stage entries, register writes, pipeline hazards and
//! problems. Emission never blocks and a missing or departed consumer is
//! silently tolerated, so the simulation's timing does not depend on
//! whoever is watching.

use std::sync::mpsc::Sender;

use crate::program::{Address, Annotation, Opcode, Register};
use crate::word::Word;

/// The three stages of instruction processing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stage {
    Fetch,
    Decode,
    Execute,
}

/// Pipeline hazard classes. Only read-after-write and control hazards are
/// ever detected by this core; the variant set mirrors the classic taxonomy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HazardKind {
    ReadAfterWrite,
    WriteAfterWrite,
    Control,
}

/// One observable fact about the running simulation.
#[derive(Clone, Debug)]
pub enum SimulationEvent {
    /// A program was (re)loaded into the CPU.
    ProgramLoaded { name: String },
    /// The run started.
    Started,
    /// The run paused (breakpoint, `break`, or an external request).
    Paused,
    /// The run resumed after a pause.
    Resumed,
    /// The run finished; always the final event of a run.
    Stopped,
    /// The clock speed changed.
    SpeedChanged { freq: f64 },
    /// A processing stage began work on the statement at `address`.
    StageEntered { stage: Stage, address: Address },
    /// An instruction was classified during decode.
    InstructionDecoded { opcode: Opcode, address: Address },
    /// A register took a new value.
    RegisterChanged { register: Register, value: Word },
    /// Bytes moved into memory (a store, or a syscall filling a buffer).
    DataMoved { address: Address, length: usize },
    /// The pipeline detected a hazard this cycle.
    Hazard { kind: HazardKind },
    /// Per-cycle pipeline occupancy; `None` marks an idle or bubbled stage.
    PipelineState {
        fetched: Option<Address>,
        decoded: Option<Address>,
        executed: Option<Address>,
    },
    /// An annotation came due (after its statement executed, or at start
    /// for an init annotation, in which case `address` is `None`).
    AnnotationDue {
        annotation: Annotation,
        address: Option<Address>,
    },
    /// Something went wrong; `line` is the source line when known.
    Problem {
        message: String,
        line: Option<usize>,
    },
}

/// A clone-able handle the core emits events through.
///
/// Backed by an optional `std::sync::mpsc` sender; send failures are
/// ignored so a consumer can disappear mid-run without consequence.
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<SimulationEvent>>,
}

impl EventSink {
    /// A sink that forwards to `sender`.
    pub fn new(sender: Sender<SimulationEvent>) -> Self {
        EventSink { sender: Some(sender) }
    }

    /// A sink that drops every event.
    pub fn disconnected() -> Self {
        EventSink { sender: None }
    }

    /// Emit an event; never blocks, never fails.
    pub fn emit(&self, event: SimulationEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_emit_and_receive() {
        let (tx, rx) = mpsc::channel();
        let sink = EventSink::new(tx);
        sink.emit(SimulationEvent::Started);
        sink.emit(SimulationEvent::Stopped);
        assert!(matches!(rx.recv().unwrap(), SimulationEvent::Started));
        assert!(matches!(rx.recv().unwrap(), SimulationEvent::Stopped));
    }

    #[test]
    fn test_disconnected_sink_is_silent() {
        let sink = EventSink::disconnected();
        sink.emit(SimulationEvent::Started);
    }

    #[test]
    fn test_departed_consumer_is_tolerated() {
        let (tx, rx) = mpsc::channel();
        let sink = EventSink::new(tx);
        drop(rx);
        sink.emit(SimulationEvent::Started);
    }
}
