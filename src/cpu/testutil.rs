//! Shared fixtures for CPU tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::cpu::core::Cpu;
use crate::events::EventSink;
use crate::io::BufferIo;
use crate::program::{Address, Opcode, Operand, Program, Statement};
use crate::word::Word;

/// A statement whose line number is filled in by [`program_from`].
pub(crate) fn stmt(opcode: Opcode, operands: Vec<Operand>) -> Statement {
    Statement::new(opcode, operands, 0)
}

/// A program with `statements` laid out from address 0 (labelled `main`),
/// numbered from source line 1, and a small zeroed data segment.
pub(crate) fn program_from(statements: Vec<Statement>) -> Arc<Program> {
    program_with_data(statements, vec![0u8; 32])
}

/// Like [`program_from`] with an explicit static data image.
pub(crate) fn program_with_data(statements: Vec<Statement>, data: Vec<u8>) -> Arc<Program> {
    let mut text = BTreeMap::new();
    for (index, mut statement) in statements.into_iter().enumerate() {
        statement.line_number = index + 1;
        text.insert(Address::new(index as u32 * 4), statement);
    }
    let data_start = Address::new(0x1000);
    let heap_start = data_start.offset(data.len() as i64);
    let mut labels = HashMap::new();
    labels.insert("main".to_string(), Address::new(0));
    Arc::new(Program {
        name: "test".to_string(),
        text_segment: text,
        text_segment_start: Address::new(0),
        data_segment: data,
        data_segment_start: data_start,
        dynamic_segment_start: heap_start,
        initial_sp: Word::from_unsigned(0x7fff_fffc),
        initial_gp: Word::from_unsigned(data_start.value() as u64),
        labels,
        annotations: HashMap::new(),
        init_annotation: None,
        source_hash: 1,
    })
}

/// Build a sequential CPU around `io`, run the program, hand both back.
pub(crate) fn run_with_io(program: Arc<Program>, io: Arc<BufferIo>) -> (Cpu, Arc<BufferIo>) {
    let mut cpu = Cpu::new(program, io.clone(), EventSink::disconnected()).unwrap();
    cpu.run_program().unwrap();
    (cpu, io)
}
