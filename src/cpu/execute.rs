//! The executor: gives effect to one decoded instruction.
//!
//! Register computations go through the ALU and write back to the
//! destination register. Branches interpret the ALU's taken/not-taken
//! result. Loads and stores move bytes between registers and memory, with
//! sub-word loads extending per their mnemonic. `syscall` implements the
//! service protocol over the register-based ABI:
//!
//! | `$v0` | service        | arguments            | result        |
//! |-------|----------------|----------------------|---------------|
//! | 1     | print integer  | `$a0`                |               |
//! | 4     | print string   | `$a0` = NUL-term ptr |               |
//! | 5     | read integer   |                      | `$v0`         |
//! | 8     | read string    | `$a0` = buf, `$a1` = len | buffer    |
//! | 9     | sbrk           | `$a0` = bytes        | `$v0` = old break |
//! | 10    | exit           |                      | run ends      |
//! | 11    | print char     | `$a0`                |               |
//! | 12    | read char      |                      | `$v0`         |

use crate::cpu::alu::{self, BRANCH_TRUE};
use crate::cpu::core::{CpuCore, CpuError};
use crate::cpu::decode::InstructionFormat;
use crate::events::SimulationEvent;
use crate::io::IoStream;
use crate::program::{Address, Opcode, Register};
use crate::word::Word;

/// How control proceeds after an instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ExecFlow {
    /// Fall through to the next statement.
    Continue,
    /// The program counter was redirected.
    Jumped,
    /// The run is over (exit syscall, or a read cancelled by a stop).
    Halt,
    /// A `break` instruction: pause and wait for the user.
    Break,
}

impl CpuCore {
    /// Execute one decoded instruction against this core.
    pub(crate) fn execute(
        &mut self,
        instruction: InstructionFormat,
    ) -> Result<ExecFlow, CpuError> {
        match instruction {
            InstructionFormat::RType { op, dest, src1, src2 } => {
                let result = alu::execute(op, src1, src2)?;
                self.write_register(dest, result);
                Ok(ExecFlow::Continue)
            }
            InstructionFormat::Branch { op, cmp1, cmp2, target } => {
                if alu::execute(op, cmp1, cmp2)? == BRANCH_TRUE {
                    self.pc = target;
                    Ok(ExecFlow::Jumped)
                } else {
                    Ok(ExecFlow::Continue)
                }
            }
            InstructionFormat::Jump { target, link, .. } => {
                if let Some(link) = link {
                    self.write_register(Register::Ra, link);
                }
                self.pc = target;
                Ok(ExecFlow::Jumped)
            }
            InstructionFormat::LoadStore { op, dest, src, address, immediate } => {
                self.load_store(op, dest, src, address, immediate)?;
                Ok(ExecFlow::Continue)
            }
            InstructionFormat::Special { op } => match op {
                Opcode::Nop => Ok(ExecFlow::Continue),
                Opcode::Break => Ok(ExecFlow::Break),
                Opcode::Syscall => self.syscall(),
                other => Err(CpuError::Malformed(other)),
            },
        }
    }

    fn load_store(
        &mut self,
        op: Opcode,
        dest: Option<Register>,
        src: Option<Word>,
        address: Option<Address>,
        immediate: Option<Word>,
    ) -> Result<(), CpuError> {
        let malformed = || CpuError::Malformed(op);
        match op {
            Opcode::Li => {
                let value = immediate.ok_or_else(malformed)?;
                self.write_register(dest.ok_or_else(malformed)?, value);
            }
            Opcode::Lui => {
                // the low half of the immediate becomes the upper half of
                // the destination
                let bytes = immediate.ok_or_else(malformed)?.bytes();
                let value = Word::from_bytes([bytes[2], bytes[3], 0, 0]);
                self.write_register(dest.ok_or_else(malformed)?, value);
            }
            Opcode::La => {
                let value = address.ok_or_else(malformed)?.into();
                self.write_register(dest.ok_or_else(malformed)?, value);
            }
            Opcode::Lw => {
                let address = address.ok_or_else(malformed)?;
                let bytes = self.memory.read_from_mem(address, 4)?;
                let value = Word::from_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                self.write_register(dest.ok_or_else(malformed)?, value);
            }
            Opcode::Lh | Opcode::Lhu => {
                let address = address.ok_or_else(malformed)?;
                let bytes = self.memory.read_from_mem(address, 2)?;
                let half = [bytes[0], bytes[1]];
                let value = if op == Opcode::Lh {
                    Word::from_signed(i16::from_be_bytes(half) as i64)
                } else {
                    Word::from_unsigned(u16::from_be_bytes(half) as u64)
                };
                self.write_register(dest.ok_or_else(malformed)?, value);
            }
            Opcode::Lb | Opcode::Lbu => {
                let address = address.ok_or_else(malformed)?;
                let byte = self.memory.read_from_mem(address, 1)?[0];
                let value = if op == Opcode::Lb {
                    Word::from_signed(byte as i8 as i64)
                } else {
                    Word::from_unsigned(byte as u64)
                };
                self.write_register(dest.ok_or_else(malformed)?, value);
            }
            Opcode::Sw => {
                let value = src.ok_or_else(malformed)?;
                self.store(address.ok_or_else(malformed)?, &value.bytes())?;
            }
            Opcode::Sh => {
                let bytes = src.ok_or_else(malformed)?.bytes();
                self.store(address.ok_or_else(malformed)?, &bytes[2..4])?;
            }
            Opcode::Sb => {
                let bytes = src.ok_or_else(malformed)?.bytes();
                self.store(address.ok_or_else(malformed)?, &bytes[3..4])?;
            }
            other => return Err(CpuError::Malformed(other)),
        }
        Ok(())
    }

    fn syscall(&mut self) -> Result<ExecFlow, CpuError> {
        let service = self.registers.get(Register::V0).to_signed();
        match service {
            // print integer
            1 => {
                let value = self.registers.get(Register::A0).to_signed();
                self.io.print_int(IoStream::Standard, value);
                Ok(ExecFlow::Continue)
            }
            // print NUL-terminated string
            4 => {
                let start = self.register_address(Register::A0);
                let bytes = self.memory.read_until_null(start)?;
                self.io
                    .print_string(IoStream::Standard, &String::from_utf8_lossy(&bytes));
                Ok(ExecFlow::Continue)
            }
            // read integer
            5 => match self.io.read_int() {
                Some(value) => {
                    self.write_register(Register::V0, Word::from_signed(value));
                    Ok(ExecFlow::Continue)
                }
                None => Ok(ExecFlow::Halt),
            },
            // read string into a bounded buffer
            8 => {
                let buffer = self.register_address(Register::A0);
                let capacity = self.registers.get(Register::A1).to_signed();
                match self.io.read_string() {
                    Some(line) => {
                        if capacity > 0 {
                            // room for capacity - 1 characters plus the NUL
                            let mut bytes = line.into_bytes();
                            bytes.truncate(capacity as usize - 1);
                            bytes.push(0);
                            self.store(buffer, &bytes)?;
                        }
                        Ok(ExecFlow::Continue)
                    }
                    None => Ok(ExecFlow::Halt),
                }
            }
            // sbrk
            9 => {
                let delta = self.registers.get(Register::A0).to_signed();
                let old_break = self.memory.sbrk(delta)?;
                self.write_register(Register::V0, old_break.into());
                Ok(ExecFlow::Continue)
            }
            // exit
            10 => Ok(ExecFlow::Halt),
            // print character
            11 => {
                let byte = self.registers.get(Register::A0).bytes()[3];
                self.io.print_char(IoStream::Standard, byte as char);
                Ok(ExecFlow::Continue)
            }
            // read character
            12 => match self.io.read_char() {
                Some(c) => {
                    self.write_register(Register::V0, Word::from_unsigned(c as u64));
                    Ok(ExecFlow::Continue)
                }
                None => Ok(ExecFlow::Halt),
            },
            other => Err(CpuError::UnknownSyscall(other)),
        }
    }

    /// Write to memory and announce the movement.
    fn store(&mut self, address: Address, bytes: &[u8]) -> Result<(), CpuError> {
        self.memory.write_to_mem(address, bytes)?;
        self.events.emit(SimulationEvent::DataMoved {
            address,
            length: bytes.len(),
        });
        Ok(())
    }

    fn register_address(&self, register: Register) -> Address {
        Address::new(self.registers.get(register).to_unsigned() as u32)
    }
}

// ============================================================================
// Tests
// ============================================================================
