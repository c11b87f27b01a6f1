//! The arithmetic and logic unit.
//!
//! A single stateless entry point, [`execute`], maps an opcode and one or
//! two operand words to a result word. Arithmetic is wrapping 32-bit
//! two's-complement: intermediate sums are taken in 64 bits and truncated
//! on encode, which is exactly the wrap the machine defines. The
//! overflow-checked mnemonics (`add` vs `addu` and friends) are therefore
//! identical here; overflow never traps.
//!
//! Branch comparisons also flow through the ALU: they evaluate to
//! [`BRANCH_TRUE`] or [`BRANCH_FALSE`], which the executor interprets as
//! taken / not taken.

use thiserror::Error;

use crate::program::Opcode;
use crate::word::Word;

/// Result of a branch comparison that holds.
pub const BRANCH_TRUE: Word = Word::from_bytes([0, 0, 0, 1]);
/// Result of a branch comparison that does not hold.
pub const BRANCH_FALSE: Word = Word::ZERO;

/// Faults the ALU can raise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AluError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("'{0}' requires a second operand")]
    MissingOperand(Opcode),
    #[error("'{0}' is not an ALU operation")]
    UnsupportedOperation(Opcode),
}

/// Apply `op` to `a` (and `b`, for binary operations).
pub fn execute(op: Opcode, a: Word, b: Option<Word>) -> Result<Word, AluError> {
    use Opcode::*;

    let sa = a.to_signed();
    let ua = a.to_unsigned();
    // resolved lazily so unary operations never touch it
    let sb = || b.map(Word::to_signed).ok_or(AluError::MissingOperand(op));
    let ub = || b.map(Word::to_unsigned).ok_or(AluError::MissingOperand(op));

    let result = match op {
        // ---- arithmetic (checked and unchecked mnemonics coincide) ----
        Add | Addu | Addi | Addiu => Word::from_signed(sa + sb()?),
        Sub | Subu | Subi | Subiu => Word::from_signed(sa - sb()?),
        Mul | Mulo => Word::from_signed((sa as i32).wrapping_mul(sb()? as i32) as i64),
        Mulou => Word::from_unsigned((ua as u32).wrapping_mul(ub()? as u32) as u64),
        Div => {
            let divisor = sb()?;
            if divisor == 0 {
                return Err(AluError::DivisionByZero);
            }
            Word::from_signed(sa / divisor)
        }
        Divu => {
            let divisor = ub()?;
            if divisor == 0 {
                return Err(AluError::DivisionByZero);
            }
            Word::from_unsigned(ua / divisor)
        }
        Rem => {
            let divisor = sb()?;
            if divisor == 0 {
                return Err(AluError::DivisionByZero);
            }
            Word::from_signed(sa % divisor)
        }
        Abs => Word::from_signed(sa.abs()),
        Neg | Negu => Word::from_signed(-sa),

        // ---- bitwise ----
        And => Word::from_unsigned(ua & ub()?),
        Or | Ori => Word::from_unsigned(ua | ub()?),
        Xor | Xori => Word::from_unsigned(ua ^ ub()?),
        Nor => Word::from_unsigned(!(ua | ub()?) & u32::MAX as u64),
        Not => Word::from_unsigned(!ua & u32::MAX as u64),

        // ---- shifts and rotates; only the low 5 bits of the amount count ----
        Sll => Word::from_unsigned(((ua as u32) << shamt(ub()?)) as u64),
        Srl => Word::from_unsigned(((ua as u32) >> shamt(ub()?)) as u64),
        Sra => Word::from_signed(((sa as i32) >> shamt(ub()?)) as i64),
        Rol => Word::from_unsigned((ua as u32).rotate_left(shamt(ub()?)) as u64),
        Ror => Word::from_unsigned((ua as u32).rotate_right(shamt(ub()?)) as u64),

        // ---- set-on-comparison ----
        Seq => bool_word(sa == sb()?),
        Sne => bool_word(sa != sb()?),
        Slt => bool_word(sa < sb()?),
        Sltu => bool_word(ua < ub()?),
        Sle => bool_word(sa <= sb()?),
        Sgt => bool_word(sa > sb()?),
        Sge => bool_word(sa >= sb()?),

        // ---- branch comparisons ----
        Beq => branch_word(sa == sb()?),
        Bne => branch_word(sa != sb()?),
        Beqz => branch_word(sa == 0),
        Bgez => branch_word(sa >= 0),
        Bgtz => branch_word(sa > 0),
        Blez => branch_word(sa <= 0),
        Bltz => branch_word(sa < 0),

        Move => a,

        _ => return Err(AluError::UnsupportedOperation(op)),
    };

    Ok(result)
}

#[inline]
fn shamt(amount: u64) -> u32 {
    (amount as u32) & 0x1f
}

#[inline]
fn bool_word(condition: bool) -> Word {
    if condition { Word::from_signed(1) } else { Word::ZERO }
}

#[inline]
fn branch_word(taken: bool) -> Word {
    if taken { BRANCH_TRUE } else { BRANCH_FALSE }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn w(v: i64) -> Word {
        Word::from_signed(v)
    }

    #[test]
    fn test_add_sub_wrap() {
        assert_eq!(execute(Opcode::Add, w(2), Some(w(3))).unwrap(), w(5));
        assert_eq!(execute(Opcode::Sub, w(2), Some(w(3))).unwrap(), w(-1));
        // i32::MAX + 1 wraps to i32::MIN; addu agrees
        let wrapped = execute(Opcode::Add, w(i32::MAX as i64), Some(w(1))).unwrap();
        assert_eq!(wrapped.to_signed(), i32::MIN as i64);
        let wrapped_u = execute(Opcode::Addu, w(i32::MAX as i64), Some(w(1))).unwrap();
        assert_eq!(wrapped, wrapped_u);
    }

    #[test]
    fn test_mul() {
        assert_eq!(execute(Opcode::Mul, w(-6), Some(w(7))).unwrap(), w(-42));
        let big = execute(Opcode::Mul, w(1 << 20), Some(w(1 << 20))).unwrap();
        assert_eq!(big.to_signed(), (1i32 << 20).wrapping_mul(1 << 20) as i64);
    }

    #[test]
    fn test_division() {
        assert_eq!(execute(Opcode::Div, w(-7), Some(w(2))).unwrap(), w(-3));
        assert_eq!(execute(Opcode::Rem, w(-7), Some(w(2))).unwrap(), w(-1));
        assert_eq!(
            execute(Opcode::Div, w(1), Some(w(0))),
            Err(AluError::DivisionByZero)
        );
        assert_eq!(
            execute(Opcode::Divu, w(1), Some(w(0))),
            Err(AluError::DivisionByZero)
        );
        assert_eq!(
            execute(Opcode::Rem, w(1), Some(w(0))),
            Err(AluError::DivisionByZero)
        );
        // divu is unsigned: -2 / 2 is a huge quotient, not -1
        let q = execute(Opcode::Divu, w(-2), Some(w(2))).unwrap();
        assert_eq!(q.to_unsigned(), (u32::MAX as u64 - 1) / 2);
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(
            execute(Opcode::And, w(0b1100), Some(w(0b1010))).unwrap(),
            w(0b1000)
        );
        assert_eq!(
            execute(Opcode::Or, w(0b1100), Some(w(0b1010))).unwrap(),
            w(0b1110)
        );
        assert_eq!(
            execute(Opcode::Xor, w(0b1100), Some(w(0b1010))).unwrap(),
            w(0b0110)
        );
        let nor = execute(Opcode::Nor, w(0), Some(w(0))).unwrap();
        assert_eq!(nor.to_unsigned(), u32::MAX as u64);
        let not = execute(Opcode::Not, w(0), None).unwrap();
        assert_eq!(not.to_unsigned(), u32::MAX as u64);
    }

    #[test]
    fn test_shifts_mask_amount() {
        assert_eq!(execute(Opcode::Sll, w(1), Some(w(4))).unwrap(), w(16));
        // an amount of 33 shifts by 1
        assert_eq!(execute(Opcode::Sll, w(1), Some(w(33))).unwrap(), w(2));
        assert_eq!(execute(Opcode::Srl, w(-1), Some(w(28))).unwrap(), w(0xf));
        assert_eq!(execute(Opcode::Sra, w(-16), Some(w(2))).unwrap(), w(-4));
        assert_eq!(
            execute(Opcode::Rol, Word::from_unsigned(0x8000_0001), Some(w(1)))
                .unwrap()
                .to_unsigned(),
            3
        );
        assert_eq!(
            execute(Opcode::Ror, w(1), Some(w(1))).unwrap().to_unsigned(),
            0x8000_0000
        );
    }

    #[test]
    fn test_set_comparisons() {
        assert_eq!(execute(Opcode::Slt, w(-1), Some(w(1))).unwrap(), w(1));
        assert_eq!(execute(Opcode::Slt, w(1), Some(w(-1))).unwrap(), w(0));
        // sltu sees -1 as u32::MAX
        assert_eq!(execute(Opcode::Sltu, w(-1), Some(w(1))).unwrap(), w(0));
        assert_eq!(execute(Opcode::Seq, w(5), Some(w(5))).unwrap(), w(1));
        assert_eq!(execute(Opcode::Sge, w(5), Some(w(5))).unwrap(), w(1));
        assert_eq!(execute(Opcode::Sgt, w(5), Some(w(5))).unwrap(), w(0));
    }

    #[test]
    fn test_branch_comparisons() {
        assert_eq!(execute(Opcode::Beq, w(3), Some(w(3))).unwrap(), BRANCH_TRUE);
        assert_eq!(execute(Opcode::Beq, w(3), Some(w(4))).unwrap(), BRANCH_FALSE);
        assert_eq!(execute(Opcode::Beqz, w(0), None).unwrap(), BRANCH_TRUE);
        assert_eq!(execute(Opcode::Bltz, w(-1), None).unwrap(), BRANCH_TRUE);
        assert_eq!(execute(Opcode::Bgez, w(0), None).unwrap(), BRANCH_TRUE);
        assert_eq!(execute(Opcode::Bgtz, w(0), None).unwrap(), BRANCH_FALSE);
    }

    #[test]
    fn test_missing_and_unsupported() {
        assert_eq!(
            execute(Opcode::Add, w(1), None),
            Err(AluError::MissingOperand(Opcode::Add))
        );
        assert_eq!(
            execute(Opcode::Syscall, w(0), None),
            Err(AluError::UnsupportedOperation(Opcode::Syscall))
        );
    }
}
