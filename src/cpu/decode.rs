//! The instruction decoder.
//!
//! Decode turns one assembled [`Statement`] into an [`InstructionFormat`]:
//! operands are checked against the opcode's contract, source registers are
//! resolved to their current values, labels to addresses, and composite
//! address operands to a single effective address. Destination slots stay
//! symbolic (and are never read) because writeback happens at execute time.
//!
//! `pc` is the address of the statement *after* the one being decoded; it
//! becomes the link value of `jal`/`jalr`.

use std::collections::HashMap;
use thiserror::Error;

use crate::cpu::registers::RegisterFile;
use crate::program::{
    Address, Opcode, Operand, OperandFormat, Register, Statement,
};
use crate::word::Word;

/// Faults raised while decoding a statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("'{opcode}' expects {expected} operand(s), got {got}")]
    WrongOperandCount {
        opcode: Opcode,
        expected: usize,
        got: usize,
    },
    #[error("operand {index} of '{opcode}' does not fit its slot")]
    OperandMismatch { opcode: Opcode, index: usize },
    #[error("unknown label '{0}'")]
    UnknownLabel(String),
}

/// A decoded instruction, grouped by how the executor treats it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionFormat {
    /// Register-computation: the ALU combines the resolved sources and the
    /// result lands in `dest`. Unary operations leave `src2` empty.
    RType {
        op: Opcode,
        dest: Register,
        src1: Word,
        src2: Option<Word>,
    },
    /// Conditional branch: the ALU compares the resolved values and the
    /// executor redirects to `target` when the comparison holds.
    Branch {
        op: Opcode,
        cmp1: Word,
        cmp2: Option<Word>,
        target: Address,
    },
    /// Unconditional transfer; `link` carries the return address for
    /// linking jumps.
    Jump {
        op: Opcode,
        target: Address,
        link: Option<Word>,
    },
    /// Memory access or immediate/address load.
    LoadStore {
        op: Opcode,
        /// Destination register of a load.
        dest: Option<Register>,
        /// Resolved value a store writes out.
        src: Option<Word>,
        /// Resolved effective address of a memory access or `la`.
        address: Option<Address>,
        /// Immediate of `li`/`lui`.
        immediate: Option<Word>,
    },
    /// Instructions carrying no operands: `syscall`, `nop`, `break`.
    Special { op: Opcode },
}

impl InstructionFormat {
    /// The registers this instruction will write when executed.
    ///
    /// `syscall` is not covered here: its write set depends on the service
    /// code in `$v0`, which the pipeline inspects separately.
    pub fn registers_written(&self) -> Vec<Register> {
        match self {
            InstructionFormat::RType { dest, .. } => vec![*dest],
            InstructionFormat::Jump { link: Some(_), .. } => vec![Register::Ra],
            InstructionFormat::LoadStore { dest: Some(dest), .. } => vec![*dest],
            _ => Vec::new(),
        }
    }
}

/// Decode `statement` against the current register state.
pub fn decode(
    statement: &Statement,
    registers: &RegisterFile,
    labels: &HashMap<String, Address>,
    pc: Address,
) -> Result<InstructionFormat, DecodeError> {
    let opcode = statement.opcode;
    let format = opcode.operand_format();
    check_operands(opcode, format, &statement.operands)?;
    let ops = &statement.operands;

    let instruction = match format {
        OperandFormat::DestSrcSrc
        | OperandFormat::DestSrcImm
        | OperandFormat::DestSrcImmU => InstructionFormat::RType {
            op: opcode,
            dest: register_of(&ops[0]),
            src1: value_of(&ops[1], registers),
            src2: Some(value_of(&ops[2], registers)),
        },
        OperandFormat::DestSrc => InstructionFormat::RType {
            op: opcode,
            dest: register_of(&ops[0]),
            src1: value_of(&ops[1], registers),
            src2: None,
        },
        OperandFormat::DestImm => InstructionFormat::LoadStore {
            op: opcode,
            dest: Some(register_of(&ops[0])),
            src: None,
            address: None,
            immediate: Some(value_of(&ops[1], registers)),
        },
        OperandFormat::Label => InstructionFormat::Jump {
            op: opcode,
            target: effective_address(&ops[0], registers, labels)?,
            link: link_for(opcode, pc),
        },
        OperandFormat::Register => InstructionFormat::Jump {
            op: opcode,
            target: Address::new(value_of(&ops[0], registers).to_unsigned() as u32),
            link: link_for(opcode, pc),
        },
        OperandFormat::CmpLabel => InstructionFormat::Branch {
            op: opcode,
            cmp1: value_of(&ops[0], registers),
            cmp2: None,
            target: effective_address(&ops[1], registers, labels)?,
        },
        OperandFormat::CmpCmpLabel => InstructionFormat::Branch {
            op: opcode,
            cmp1: value_of(&ops[0], registers),
            cmp2: Some(value_of(&ops[1], registers)),
            target: effective_address(&ops[2], registers, labels)?,
        },
        OperandFormat::SrcAddr => InstructionFormat::LoadStore {
            op: opcode,
            dest: None,
            src: Some(value_of(&ops[0], registers)),
            address: Some(effective_address(&ops[1], registers, labels)?),
            immediate: None,
        },
        OperandFormat::DestAddr => InstructionFormat::LoadStore {
            op: opcode,
            dest: Some(register_of(&ops[0])),
            src: None,
            address: Some(effective_address(&ops[1], registers, labels)?),
            immediate: None,
        },
        OperandFormat::NoArguments => InstructionFormat::Special { op: opcode },
    };

    Ok(instruction)
}

fn check_operands(
    opcode: Opcode,
    format: OperandFormat,
    operands: &[Operand],
) -> Result<(), DecodeError> {
    let slots = format.slots();
    if operands.len() != slots.len() {
        return Err(DecodeError::WrongOperandCount {
            opcode,
            expected: slots.len(),
            got: operands.len(),
        });
    }
    for (index, (slot, operand)) in slots.iter().zip(operands).enumerate() {
        if !slot.accepts(operand.kind()) {
            return Err(DecodeError::OperandMismatch { opcode, index });
        }
    }
    Ok(())
}

/// The register named by an operand already validated as a register.
fn register_of(operand: &Operand) -> Register {
    match operand {
        Operand::Register(r) => *r,
        _ => Register::Zero,
    }
}

/// Resolve an operand to a value: registers read the register file,
/// integers encode as words.
fn value_of(operand: &Operand, registers: &RegisterFile) -> Word {
    match operand {
        Operand::Register(r) => registers.get(*r),
        Operand::Integer(v) => Word::from_signed(*v),
        Operand::Address { .. } => Word::ZERO,
    }
}

/// Sum the parts of a composite address operand: label address, constant
/// offset, and the current value of the base register. Missing parts
/// contribute zero.
fn effective_address(
    operand: &Operand,
    registers: &RegisterFile,
    labels: &HashMap<String, Address>,
) -> Result<Address, DecodeError> {
    match operand {
        Operand::Address { label, constant, base } => {
            let label_part = match label {
                Some(name) => labels
                    .get(name)
                    .copied()
                    .ok_or_else(|| DecodeError::UnknownLabel(name.clone()))?
                    .value() as i64,
                None => 0,
            };
            let base_part = match base {
                Some(register) => registers.get(*register).to_unsigned() as i64,
                None => 0,
            };
            Ok(Address::new(
                (label_part + constant + base_part) as u32,
            ))
        }
        _ => Ok(Address::new(0)),
    }
}

/// Linking jumps record the address of the following statement.
fn link_for(opcode: Opcode, pc: Address) -> Option<Word> {
    match opcode {
        Opcode::Jal | Opcode::Jalr => Some(pc.into()),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> HashMap<String, Address> {
        let mut labels = HashMap::new();
        labels.insert("main".to_string(), Address::new(0x10));
        labels.insert("buf".to_string(), Address::new(0x200));
        labels
    }

    fn stmt(opcode: Opcode, operands: Vec<Operand>) -> Statement {
        Statement::new(opcode, operands, 1)
    }

    #[test]
    fn test_decode_rtype_resolves_sources() {
        let mut regs = RegisterFile::new();
        regs.set(Register::T1, Word::from_signed(5));
        regs.set(Register::T2, Word::from_signed(7));
        let add = stmt(
            Opcode::Add,
            vec![
                Operand::Register(Register::T0),
                Operand::Register(Register::T1),
                Operand::Register(Register::T2),
            ],
        );
        let decoded = decode(&add, &regs, &labels(), Address::new(0x14)).unwrap();
        assert_eq!(
            decoded,
            InstructionFormat::RType {
                op: Opcode::Add,
                dest: Register::T0,
                src1: Word::from_signed(5),
                src2: Some(Word::from_signed(7)),
            }
        );
    }

    #[test]
    fn test_decode_immediate_source() {
        let regs = RegisterFile::new();
        let addi = stmt(
            Opcode::Addi,
            vec![
                Operand::Register(Register::T0),
                Operand::Register(Register::T1),
                Operand::Integer(-3),
            ],
        );
        match decode(&addi, &regs, &labels(), Address::new(0)).unwrap() {
            InstructionFormat::RType { src2: Some(imm), .. } => {
                assert_eq!(imm.to_signed(), -3);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_branch_and_jump() {
        let mut regs = RegisterFile::new();
        regs.set(Register::T0, Word::from_signed(1));
        let beq = stmt(
            Opcode::Beq,
            vec![
                Operand::Register(Register::T0),
                Operand::Register(Register::T1),
                Operand::label("main"),
            ],
        );
        let decoded = decode(&beq, &regs, &labels(), Address::new(0x20)).unwrap();
        assert_eq!(
            decoded,
            InstructionFormat::Branch {
                op: Opcode::Beq,
                cmp1: Word::from_signed(1),
                cmp2: Some(Word::ZERO),
                target: Address::new(0x10),
            }
        );

        let jal = stmt(Opcode::Jal, vec![Operand::label("main")]);
        let decoded = decode(&jal, &regs, &labels(), Address::new(0x20)).unwrap();
        assert_eq!(
            decoded,
            InstructionFormat::Jump {
                op: Opcode::Jal,
                target: Address::new(0x10),
                link: Some(Word::from_unsigned(0x20)),
            }
        );

        // j does not link
        let j = stmt(Opcode::J, vec![Operand::label("main")]);
        match decode(&j, &regs, &labels(), Address::new(0x20)).unwrap() {
            InstructionFormat::Jump { link: None, .. } => {}
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_jr_reads_register() {
        let mut regs = RegisterFile::new();
        regs.set(Register::Ra, Word::from_unsigned(0x44));
        let jr = stmt(Opcode::Jr, vec![Operand::Register(Register::Ra)]);
        match decode(&jr, &regs, &labels(), Address::new(0)).unwrap() {
            InstructionFormat::Jump { target, link: None, .. } => {
                assert_eq!(target, Address::new(0x44));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_effective_address_sums_parts() {
        let mut regs = RegisterFile::new();
        regs.set(Register::T1, Word::from_unsigned(0x20));
        let lw = stmt(
            Opcode::Lw,
            vec![
                Operand::Register(Register::T0),
                Operand::Address {
                    label: Some("buf".to_string()),
                    constant: 8,
                    base: Some(Register::T1),
                },
            ],
        );
        match decode(&lw, &regs, &labels(), Address::new(0)).unwrap() {
            InstructionFormat::LoadStore { address: Some(address), .. } => {
                assert_eq!(address, Address::new(0x200 + 8 + 0x20));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_store_resolves_value() {
        let mut regs = RegisterFile::new();
        regs.set(Register::T0, Word::from_signed(99));
        let sw = stmt(
            Opcode::Sw,
            vec![
                Operand::Register(Register::T0),
                Operand::Address { label: None, constant: 0x300, base: None },
            ],
        );
        match decode(&sw, &regs, &labels(), Address::new(0)).unwrap() {
            InstructionFormat::LoadStore { src: Some(value), dest: None, .. } => {
                assert_eq!(value.to_signed(), 99);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_bad_operands() {
        let regs = RegisterFile::new();
        // too few operands
        let add = stmt(Opcode::Add, vec![Operand::Register(Register::T0)]);
        assert_eq!(
            decode(&add, &regs, &labels(), Address::new(0)),
            Err(DecodeError::WrongOperandCount {
                opcode: Opcode::Add,
                expected: 3,
                got: 1,
            })
        );
        // an immediate where a source register belongs
        let bad = stmt(
            Opcode::Add,
            vec![
                Operand::Register(Register::T0),
                Operand::Integer(1),
                Operand::Register(Register::T2),
            ],
        );
        assert_eq!(
            decode(&bad, &regs, &labels(), Address::new(0)),
            Err(DecodeError::OperandMismatch { opcode: Opcode::Add, index: 1 })
        );
        // a negative immediate in an unsigned slot
        let bad_u = stmt(
            Opcode::Ori,
            vec![
                Operand::Register(Register::T0),
                Operand::Register(Register::T1),
                Operand::Integer(-1),
            ],
        );
        assert!(decode(&bad_u, &regs, &labels(), Address::new(0)).is_err());
    }

    #[test]
    fn test_unknown_label() {
        let regs = RegisterFile::new();
        let j = stmt(Opcode::J, vec![Operand::label("nowhere")]);
        assert_eq!(
            decode(&j, &regs, &labels(), Address::new(0)),
            Err(DecodeError::UnknownLabel("nowhere".to_string()))
        );
    }

    #[test]
    fn test_registers_written() {
        let regs = RegisterFile::new();
        let jal = stmt(Opcode::Jal, vec![Operand::label("main")]);
        let decoded = decode(&jal, &regs, &labels(), Address::new(0x20)).unwrap();
        assert_eq!(decoded.registers_written(), vec![Register::Ra]);

        let nop = decode(&stmt(Opcode::Nop, vec![]), &regs, &labels(), Address::new(0)).unwrap();
        assert!(nop.registers_written().is_empty());
    }
}
