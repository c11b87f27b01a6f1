//! The assembled-program data model.
//!
//! A [`Program`] is the artifact an external assembler hands to the
//! simulation core: statements keyed by text-segment address, an initial
//! static data image, segment boundaries, label addresses, and optional
//! per-statement annotations. The whole model is serde-serializable so a
//! program can travel as JSON.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::word::Word;

// ============================================================================
// Addresses
// ============================================================================

/// A 32-bit address into the simulated memory space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(u32);

impl Address {
    #[inline]
    pub const fn new(value: u32) -> Self {
        Address(value)
    }

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// The address `bytes` further on, wrapping at the 32-bit boundary.
    #[inline]
    pub fn offset(self, bytes: i64) -> Address {
        Address(self.0.wrapping_add(bytes as u32))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#010x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<Address> for Word {
    fn from(address: Address) -> Self {
        Word::from_unsigned(address.0 as u64)
    }
}

// ============================================================================
// Registers
// ============================================================================

/// The 32 general-purpose registers, in numbering order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    Zero, At,
    V0, V1,
    A0, A1, A2, A3,
    T0, T1, T2, T3, T4, T5, T6, T7,
    S0, S1, S2, S3, S4, S5, S6, S7,
    T8, T9,
    K0, K1,
    Gp, Sp, Fp, Ra,
}

impl Register {
    /// All registers, indexed by hardware id.
    pub const ALL: [Register; 32] = [
        Register::Zero, Register::At,
        Register::V0, Register::V1,
        Register::A0, Register::A1, Register::A2, Register::A3,
        Register::T0, Register::T1, Register::T2, Register::T3,
        Register::T4, Register::T5, Register::T6, Register::T7,
        Register::S0, Register::S1, Register::S2, Register::S3,
        Register::S4, Register::S5, Register::S6, Register::S7,
        Register::T8, Register::T9,
        Register::K0, Register::K1,
        Register::Gp, Register::Sp, Register::Fp, Register::Ra,
    ];

    /// Hardware register number, 0..=31.
    #[inline]
    pub fn id(self) -> usize {
        Register::ALL.iter().position(|r| *r == self).unwrap_or(0)
    }

    /// Look up a register by hardware number.
    pub fn from_id(id: usize) -> Option<Register> {
        Register::ALL.get(id).copied()
    }

    /// Conventional name without the `$` sigil, e.g. `"t0"`.
    pub fn name(self) -> &'static str {
        match self {
            Register::Zero => "zero", Register::At => "at",
            Register::V0 => "v0", Register::V1 => "v1",
            Register::A0 => "a0", Register::A1 => "a1",
            Register::A2 => "a2", Register::A3 => "a3",
            Register::T0 => "t0", Register::T1 => "t1",
            Register::T2 => "t2", Register::T3 => "t3",
            Register::T4 => "t4", Register::T5 => "t5",
            Register::T6 => "t6", Register::T7 => "t7",
            Register::S0 => "s0", Register::S1 => "s1",
            Register::S2 => "s2", Register::S3 => "s3",
            Register::S4 => "s4", Register::S5 => "s5",
            Register::S6 => "s6", Register::S7 => "s7",
            Register::T8 => "t8", Register::T9 => "t9",
            Register::K0 => "k0", Register::K1 => "k1",
            Register::Gp => "gp", Register::Sp => "sp",
            Register::Fp => "fp", Register::Ra => "ra",
        }
    }

    /// Look up a register by conventional name, with or without the `$`.
    pub fn from_name(name: &str) -> Option<Register> {
        let name = name.strip_prefix('$').unwrap_or(name);
        Register::ALL.iter().copied().find(|r| r.name() == name)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name())
    }
}

// ============================================================================
// Opcodes and operand contracts
// ============================================================================

/// Every instruction the core understands.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    // arithmetic / logic
    Abs, And, Add, Addu, Addi, Addiu,
    Sub, Subu, Subi, Subiu,
    Mul, Mulo, Mulou, Div, Divu, Rem,
    Neg, Negu, Nor, Not, Or, Ori, Xor, Xori,
    // shifts and rotates
    Sll, Srl, Sra, Rol, Ror,
    // set-on-comparison
    Seq, Sne, Slt, Sltu, Sle, Sgt, Sge,
    // loads of immediates and addresses
    Li, Lui, La,
    // branches and jumps
    B, Beq, Bne, Bgez, Bgtz, Blez, Bltz, Beqz,
    J, Jal, Jr, Jalr,
    // memory access
    Lb, Lbu, Lh, Lhu, Lw, Sb, Sh, Sw,
    // miscellaneous
    Move, Syscall, Nop, Break,
}

impl Opcode {
    /// Assembly mnemonic for this opcode.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Abs => "abs", Opcode::And => "and",
            Opcode::Add => "add", Opcode::Addu => "addu",
            Opcode::Addi => "addi", Opcode::Addiu => "addiu",
            Opcode::Sub => "sub", Opcode::Subu => "subu",
            Opcode::Subi => "subi", Opcode::Subiu => "subiu",
            Opcode::Mul => "mul", Opcode::Mulo => "mulo",
            Opcode::Mulou => "mulou", Opcode::Div => "div",
            Opcode::Divu => "divu", Opcode::Rem => "rem",
            Opcode::Neg => "neg", Opcode::Negu => "negu",
            Opcode::Nor => "nor", Opcode::Not => "not",
            Opcode::Or => "or", Opcode::Ori => "ori",
            Opcode::Xor => "xor", Opcode::Xori => "xori",
            Opcode::Sll => "sll", Opcode::Srl => "srl",
            Opcode::Sra => "sra", Opcode::Rol => "rol", Opcode::Ror => "ror",
            Opcode::Seq => "seq", Opcode::Sne => "sne",
            Opcode::Slt => "slt", Opcode::Sltu => "sltu",
            Opcode::Sle => "sle", Opcode::Sgt => "sgt", Opcode::Sge => "sge",
            Opcode::Li => "li", Opcode::Lui => "lui", Opcode::La => "la",
            Opcode::B => "b", Opcode::Beq => "beq", Opcode::Bne => "bne",
            Opcode::Bgez => "bgez", Opcode::Bgtz => "bgtz",
            Opcode::Blez => "blez", Opcode::Bltz => "bltz",
            Opcode::Beqz => "beqz",
            Opcode::J => "j", Opcode::Jal => "jal",
            Opcode::Jr => "jr", Opcode::Jalr => "jalr",
            Opcode::Lb => "lb", Opcode::Lbu => "lbu",
            Opcode::Lh => "lh", Opcode::Lhu => "lhu", Opcode::Lw => "lw",
            Opcode::Sb => "sb", Opcode::Sh => "sh", Opcode::Sw => "sw",
            Opcode::Move => "move", Opcode::Syscall => "syscall",
            Opcode::Nop => "nop", Opcode::Break => "break",
        }
    }

    /// The operand contract this opcode imposes on its statement.
    pub fn operand_format(self) -> OperandFormat {
        use Opcode::*;
        match self {
            And | Add | Addu | Sub | Subu | Mul | Mulo | Mulou | Div | Divu
            | Rem | Nor | Or | Xor | Seq | Sne | Slt | Sltu | Sle | Sgt
            | Sge => OperandFormat::DestSrcSrc,
            Addi | Subi | Sll | Srl | Sra | Rol | Ror => OperandFormat::DestSrcImm,
            Addiu | Subiu | Ori | Xori => OperandFormat::DestSrcImmU,
            Abs | Neg | Negu | Not | Move => OperandFormat::DestSrc,
            Li | Lui => OperandFormat::DestImm,
            B | J | Jal => OperandFormat::Label,
            Jr | Jalr => OperandFormat::Register,
            Bgez | Bgtz | Blez | Bltz | Beqz => OperandFormat::CmpLabel,
            Beq | Bne => OperandFormat::CmpCmpLabel,
            La | Lb | Lbu | Lh | Lhu | Lw => OperandFormat::DestAddr,
            Sb | Sh | Sw => OperandFormat::SrcAddr,
            Syscall | Nop | Break => OperandFormat::NoArguments,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// The role an operand slot plays in an instruction.
///
/// Slots are deliberately more specific than the operands that fill them:
/// a slot requiring a destination register is satisfied by any register
/// operand, and a signed-immediate slot is satisfied by an unsigned one.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    DestRegister,
    SrcRegister,
    TargetRegister,
    Register,
    Immediate,
    UnsignedImmediate,
    Address,
    Label,
}

impl OperandKind {
    /// Does a slot of this kind accept an operand classified as `actual`?
    pub fn accepts(self, actual: OperandKind) -> bool {
        match self {
            OperandKind::DestRegister
            | OperandKind::SrcRegister
            | OperandKind::TargetRegister
            | OperandKind::Register => matches!(
                actual,
                OperandKind::DestRegister
                    | OperandKind::SrcRegister
                    | OperandKind::TargetRegister
                    | OperandKind::Register
            ),
            OperandKind::Immediate => {
                matches!(actual, OperandKind::Immediate | OperandKind::UnsignedImmediate)
            }
            OperandKind::UnsignedImmediate => actual == OperandKind::UnsignedImmediate,
            OperandKind::Address => {
                matches!(actual, OperandKind::Address | OperandKind::Label)
            }
            OperandKind::Label => actual == OperandKind::Label,
        }
    }

    /// Whether a register operand in a slot of this kind is read during
    /// decode. Destination slots are write-only.
    pub fn reads_register(self) -> bool {
        matches!(
            self,
            OperandKind::SrcRegister | OperandKind::TargetRegister | OperandKind::Register
        )
    }
}

/// The fixed operand layouts instructions choose from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandFormat {
    DestSrcSrc,
    DestSrcImm,
    DestSrcImmU,
    DestSrc,
    DestImm,
    NoArguments,
    Label,
    Register,
    CmpLabel,
    CmpCmpLabel,
    SrcAddr,
    DestAddr,
}

impl OperandFormat {
    /// The slot kinds of this layout, in operand order.
    pub fn slots(self) -> &'static [OperandKind] {
        use OperandKind::{
            DestRegister, Immediate, Label, SrcRegister, UnsignedImmediate,
        };
        match self {
            OperandFormat::DestSrcSrc => &[DestRegister, SrcRegister, SrcRegister],
            OperandFormat::DestSrcImm => &[DestRegister, SrcRegister, Immediate],
            OperandFormat::DestSrcImmU => &[DestRegister, SrcRegister, UnsignedImmediate],
            OperandFormat::DestSrc => &[DestRegister, SrcRegister],
            OperandFormat::DestImm => &[DestRegister, Immediate],
            OperandFormat::NoArguments => &[],
            OperandFormat::Label => &[Label],
            OperandFormat::Register => &[OperandKind::Register],
            OperandFormat::CmpLabel => &[SrcRegister, Label],
            OperandFormat::CmpCmpLabel => &[SrcRegister, SrcRegister, Label],
            OperandFormat::SrcAddr => &[SrcRegister, OperandKind::Address],
            OperandFormat::DestAddr => &[DestRegister, OperandKind::Address],
        }
    }

    /// Check a statement's operands against this layout.
    pub fn accepts(self, operands: &[Operand]) -> bool {
        let slots = self.slots();
        operands.len() == slots.len()
            && slots
                .iter()
                .zip(operands)
                .all(|(slot, operand)| slot.accepts(operand.kind()))
    }
}

// ============================================================================
// Operands and statements
// ============================================================================

/// A single operand as the assembler produced it.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operand {
    Register(Register),
    Integer(i64),
    /// A composite address: any subset of `label + constant + (base)` parts.
    Address {
        label: Option<String>,
        constant: i64,
        base: Option<Register>,
    },
}

impl Operand {
    /// A bare label reference, `label + 0` with no base register.
    pub fn label(name: &str) -> Operand {
        Operand::Address {
            label: Some(name.to_string()),
            constant: 0,
            base: None,
        }
    }

    /// The most specific kind this operand can be classified as.
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Register(_) => OperandKind::Register,
            Operand::Integer(v) if *v >= 0 => OperandKind::UnsignedImmediate,
            Operand::Integer(_) => OperandKind::Immediate,
            Operand::Address { label: Some(_), constant: 0, base: None } => OperandKind::Label,
            Operand::Address { .. } => OperandKind::Address,
        }
    }
}

/// One assembled statement: an opcode plus its operands, tagged with the
/// source line it came from.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Statement {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub line_number: usize,
}

impl Statement {
    pub fn new(opcode: Opcode, operands: Vec<Operand>, line_number: usize) -> Self {
        Statement { opcode, operands, line_number }
    }

    /// The registers this statement reads, per its operand contract.
    ///
    /// Source, comparison and plain register slots read their register;
    /// composite address operands read their base register. Destination
    /// slots do not read.
    pub fn registers_read(&self) -> Vec<Register> {
        let slots = self.opcode.operand_format().slots();
        let mut read = Vec::new();
        for (slot, operand) in slots.iter().zip(&self.operands) {
            match operand {
                Operand::Register(r) if slot.reads_register() => read.push(*r),
                Operand::Address { base: Some(r), .. } => read.push(*r),
                _ => {}
            }
        }
        read
    }
}

/// A visualisation hook attached to a statement (or to program start).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Annotation {
    pub code: String,
}

// ============================================================================
// Program
// ============================================================================

/// A complete assembled program, ready to load into the simulator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Program {
    /// Name of the source this program came from, for display only.
    pub name: String,
    /// Text segment: one statement per (word-aligned) address.
    pub text_segment: BTreeMap<Address, Statement>,
    /// Lowest text-segment address.
    pub text_segment_start: Address,
    /// Initial static data image, laid out from `data_segment_start`.
    pub data_segment: Vec<u8>,
    /// Lowest static-data address.
    pub data_segment_start: Address,
    /// Base of the growable heap, directly above static data.
    pub dynamic_segment_start: Address,
    /// Top of the downward-growing stack; the initial `$sp`.
    pub initial_sp: Word,
    /// Initial `$gp`.
    pub initial_gp: Word,
    /// Label name to address.
    pub labels: HashMap<String, Address>,
    /// Per-statement visualisation annotations.
    pub annotations: HashMap<Address, Annotation>,
    /// Annotation to run once when the simulation starts.
    pub init_annotation: Option<Annotation>,
    /// Hash of the source text this program was assembled from.
    pub source_hash: i64,
}

impl Program {
    /// Address of the last statement in the text segment, if any.
    pub fn last_address(&self) -> Option<Address> {
        self.text_segment.keys().next_back().copied()
    }

    /// The entry point: the address of the `main` label.
    pub fn entry_point(&self) -> Option<Address> {
        self.labels.get("main").copied()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_ids_roundtrip() {
        for (id, reg) in Register::ALL.iter().enumerate() {
            assert_eq!(reg.id(), id);
            assert_eq!(Register::from_id(id), Some(*reg));
        }
        assert_eq!(Register::from_id(32), None);
    }

    #[test]
    fn test_register_names() {
        assert_eq!(Register::from_name("t0"), Some(Register::T0));
        assert_eq!(Register::from_name("$sp"), Some(Register::Sp));
        assert_eq!(Register::from_name("bogus"), None);
        assert_eq!(Register::Ra.to_string(), "$ra");
    }

    #[test]
    fn test_operand_kinds() {
        assert_eq!(Operand::Register(Register::T0).kind(), OperandKind::Register);
        assert_eq!(Operand::Integer(3).kind(), OperandKind::UnsignedImmediate);
        assert_eq!(Operand::Integer(-3).kind(), OperandKind::Immediate);
        assert_eq!(Operand::label("main").kind(), OperandKind::Label);
        let composite = Operand::Address {
            label: Some("buf".into()),
            constant: 4,
            base: Some(Register::T1),
        };
        assert_eq!(composite.kind(), OperandKind::Address);
    }

    #[test]
    fn test_slot_acceptance() {
        // any register operand satisfies any register slot
        assert!(OperandKind::DestRegister.accepts(OperandKind::Register));
        assert!(OperandKind::SrcRegister.accepts(OperandKind::Register));
        // signed slots take unsigned operands, not vice versa
        assert!(OperandKind::Immediate.accepts(OperandKind::UnsignedImmediate));
        assert!(!OperandKind::UnsignedImmediate.accepts(OperandKind::Immediate));
        // address slots take bare labels
        assert!(OperandKind::Address.accepts(OperandKind::Label));
        assert!(!OperandKind::Label.accepts(OperandKind::Address));
    }

    #[test]
    fn test_format_accepts() {
        let add = OperandFormat::DestSrcSrc;
        let regs = vec![
            Operand::Register(Register::T0),
            Operand::Register(Register::T1),
            Operand::Register(Register::T2),
        ];
        assert!(add.accepts(&regs));
        assert!(!add.accepts(&regs[..2].to_vec()));

        let addi_ops = vec![
            Operand::Register(Register::T0),
            Operand::Register(Register::T1),
            Operand::Integer(-5),
        ];
        assert!(OperandFormat::DestSrcImm.accepts(&addi_ops));
        assert!(!OperandFormat::DestSrcImmU.accepts(&addi_ops));
    }

    #[test]
    fn test_registers_read() {
        // add $t0, $t1, $t2 reads t1 and t2, not the destination
        let add = Statement::new(
            Opcode::Add,
            vec![
                Operand::Register(Register::T0),
                Operand::Register(Register::T1),
                Operand::Register(Register::T2),
            ],
            1,
        );
        assert_eq!(add.registers_read(), vec![Register::T1, Register::T2]);

        // sw $t0, 4($sp) reads both the stored register and the base
        let sw = Statement::new(
            Opcode::Sw,
            vec![
                Operand::Register(Register::T0),
                Operand::Address { label: None, constant: 4, base: Some(Register::Sp) },
            ],
            2,
        );
        assert_eq!(sw.registers_read(), vec![Register::T0, Register::Sp]);

        // lw $t0, 4($sp) reads only the base
        let lw = Statement::new(
            Opcode::Lw,
            vec![
                Operand::Register(Register::T0),
                Operand::Address { label: None, constant: 4, base: Some(Register::Sp) },
            ],
            3,
        );
        assert_eq!(lw.registers_read(), vec![Register::Sp]);
    }

    #[test]
    fn test_address_offset_wraps() {
        assert_eq!(Address::new(0x10).offset(4), Address::new(0x14));
        assert_eq!(Address::new(0x10).offset(-16), Address::new(0));
        assert_eq!(Address::new(u32::MAX).offset(1), Address::new(0));
    }
}
