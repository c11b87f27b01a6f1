//! The general-purpose register file.

use std::fmt;

use crate::program::Register;
use crate::word::Word;

/// Thirty-two words of register state.
///
/// `$zero` is hardwired: reads always yield [`Word::ZERO`] and writes are
/// silently discarded.
#[derive(Clone, PartialEq, Eq)]
pub struct RegisterFile {
    values: [Word; 32],
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile { values: [Word::ZERO; 32] }
    }

    /// Read a register.
    #[inline]
    pub fn get(&self, register: Register) -> Word {
        if register == Register::Zero {
            Word::ZERO
        } else {
            self.values[register.id()]
        }
    }

    /// Write a register. Writes to `$zero` are discarded.
    #[inline]
    pub fn set(&mut self, register: Register, value: Word) {
        if register != Register::Zero {
            self.values[register.id()] = value;
        }
    }

    /// Reset every register to zero.
    pub fn clear(&mut self) {
        self.values = [Word::ZERO; 32];
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile::new()
    }
}

impl fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for register in Register::ALL {
            let value = self.get(register);
            if !value.is_zero() {
                map.entry(&register.name(), &value.to_signed());
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let mut regs = RegisterFile::new();
        regs.set(Register::T0, Word::from_signed(42));
        assert_eq!(regs.get(Register::T0).to_signed(), 42);
        assert_eq!(regs.get(Register::T1).to_signed(), 0);
    }

    #[test]
    fn test_zero_is_hardwired() {
        let mut regs = RegisterFile::new();
        regs.set(Register::Zero, Word::from_signed(99));
        assert_eq!(regs.get(Register::Zero), Word::ZERO);
    }

    #[test]
    fn test_clear() {
        let mut regs = RegisterFile::new();
        regs.set(Register::Sp, Word::from_unsigned(0x7fff_0000));
        regs.clear();
        assert_eq!(regs.get(Register::Sp), Word::ZERO);
    }
}
