//! The segmented main memory.
//!
//! Four segments, lowest address first:
//! - **text**: assembled statements, one per word-aligned address; fetch
//!   only, never byte-addressed
//! - **static data**: a fixed-size image laid down at load time
//! - **heap**: grows upward from the dynamic-segment base under `sbrk`
//!   control, up to a hard maximum
//! - **stack**: grows downward from the initial `$sp`, allocated lazily,
//!   up to a hard maximum
//!
//! Every byte access is routed to exactly one segment; an access that fits
//! no segment (or straddles two) is a fault.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::program::{Address, Program, Statement};
use crate::word::Word;

/// Default hard cap for the heap and for the stack, in bytes.
pub const DEFAULT_SEGMENT_MAX: usize = 1_048_576;

// ============================================================================
// Errors
// ============================================================================

/// Faults raised by the heap segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("sbrk argument {0} is not a multiple of 4")]
    UnalignedBreak(i64),
    #[error("sbrk would move the break below the start of the heap")]
    BreakUnderflow,
    #[error("sbrk would grow the heap past its maximum of {max} bytes")]
    Exhausted { max: usize },
    #[error("access of {length} bytes at heap offset {offset} is beyond the break")]
    BeyondBreak { offset: usize, length: usize },
}

/// Faults raised by the stack segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("invalid access on the stack (attempt to access above the top)")]
    AboveTop,
    #[error("stack overflow (attempt to access the stack beyond its maximum length)")]
    Overflow,
    #[error("stack access must have a positive length")]
    InvalidLength,
}

/// Faults raised by main memory as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("invalid read of {length} bytes at address {address}")]
    InvalidRead { address: Address, length: usize },
    #[error("invalid write of {length} bytes at address {address}")]
    InvalidWrite { address: Address, length: usize },
    #[error("no instruction at address {0}")]
    InvalidFetch(Address),
    #[error("misaligned instruction fetch at address {0}")]
    MisalignedFetch(Address),
    #[error("unterminated string starting at address {0}")]
    UnterminatedString(Address),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Stack(#[from] StackError),
}

// ============================================================================
// Heap segment
// ============================================================================

/// The upward-growing dynamic data segment, managed through `sbrk`.
///
/// The break starts at the segment base; `sbrk` moves it by a multiple of
/// four bytes and returns the old break address. Accesses are valid
/// strictly below the break. Backing storage grows by half-again steps so
/// repeated small `sbrk` calls stay cheap.
#[derive(Clone, Debug)]
pub struct HeapSegment {
    base: Address,
    data: Vec<u8>,
    /// Current break, as an offset from `base`.
    brk: usize,
    max: usize,
}

impl HeapSegment {
    pub fn new(base: Address, max: usize) -> Self {
        HeapSegment { base, data: Vec::new(), brk: 0, max }
    }

    /// The current break address.
    pub fn break_address(&self) -> Address {
        self.base.offset(self.brk as i64)
    }

    /// Move the break by `delta` bytes.
    ///
    /// A grow returns the start of the newly allocated block (the old
    /// break); a shrink returns the new break; `delta == 0` returns the
    /// current break unchanged.
    pub fn sbrk(&mut self, delta: i64) -> Result<Address, HeapError> {
        if delta % 4 != 0 {
            return Err(HeapError::UnalignedBreak(delta));
        }
        let old_break = self.break_address();
        let new_brk = self.brk as i64 + delta;
        if new_brk < 0 {
            return Err(HeapError::BreakUnderflow);
        }
        let new_brk = new_brk as usize;
        if new_brk > self.max {
            return Err(HeapError::Exhausted { max: self.max });
        }
        if new_brk > self.data.len() {
            let grown = (self.data.len() + self.data.len() / 2).max(new_brk).min(self.max);
            self.data.resize(grown, 0);
        }
        self.brk = new_brk;
        if delta < 0 {
            Ok(self.break_address())
        } else {
            Ok(old_break)
        }
    }

    fn check(&self, offset: usize, length: usize) -> Result<(), HeapError> {
        if offset + length > self.brk {
            return Err(HeapError::BeyondBreak { offset, length });
        }
        Ok(())
    }

    pub fn read(&self, offset: usize, length: usize) -> Result<&[u8], HeapError> {
        self.check(offset, length)?;
        Ok(&self.data[offset..offset + length])
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), HeapError> {
        self.check(offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

// ============================================================================
// Stack segment
// ============================================================================

/// The downward-growing stack.
///
/// Occupies addresses `[top - max, top)` where `top` is the initial `$sp`
/// (exclusive: the word at `$sp` itself is above the stack). Storage is
/// allocated lazily from the top downwards; bytes below the allocated
/// region read as zero and grow the allocation when written. The buffer
/// keeps the highest addresses at its end, so growth prepends zeros.
#[derive(Clone, Debug)]
pub struct StackSegment {
    top: Address,
    data: Vec<u8>,
    max: usize,
}

impl StackSegment {
    pub fn new(top: Address, max: usize) -> Self {
        StackSegment { top, data: Vec::new(), max }
    }

    /// Lowest address currently backed by storage.
    pub fn low_water_mark(&self) -> Address {
        self.top.offset(-(self.data.len() as i64))
    }

    /// Validate an access and grow the allocation to cover it.
    ///
    /// Returns the buffer index of the first byte of the access.
    fn locate(&mut self, address: Address, length: usize) -> Result<usize, StackError> {
        if length == 0 {
            return Err(StackError::InvalidLength);
        }
        let top = self.top.value() as u64;
        let start = address.value() as u64;
        if start + length as u64 > top {
            return Err(StackError::AboveTop);
        }
        let depth = (top - start) as usize;
        if depth > self.max {
            return Err(StackError::Overflow);
        }
        if depth > self.data.len() {
            let grown = (self.data.len() + self.data.len() / 2).max(depth).min(self.max);
            let mut fresh = vec![0u8; grown];
            let keep = self.data.len();
            fresh[grown - keep..].copy_from_slice(&self.data);
            self.data = fresh;
        }
        Ok(self.data.len() - depth)
    }

    pub fn read(&mut self, address: Address, length: usize) -> Result<&[u8], StackError> {
        let index = self.locate(address, length)?;
        Ok(&self.data[index..index + length])
    }

    pub fn write(&mut self, address: Address, bytes: &[u8]) -> Result<(), StackError> {
        let index = self.locate(address, bytes.len())?;
        self.data[index..index + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

// ============================================================================
// Main memory
// ============================================================================

/// Which segment an address range falls in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Segment {
    StaticData,
    Heap,
    Stack,
}

/// The complete simulated memory, assembled from a [`Program`].
pub struct MainMemory {
    text: BTreeMap<Address, Statement>,
    text_start: Address,
    data: Vec<u8>,
    data_start: Address,
    heap: HeapSegment,
    stack: StackSegment,
    stack_top: Address,
    stack_max: usize,
}

impl MainMemory {
    /// Build memory for `program` with the default segment maxima.
    pub fn new(program: &Program) -> Self {
        MainMemory::with_maxima(program, DEFAULT_SEGMENT_MAX, DEFAULT_SEGMENT_MAX)
    }

    /// Build memory with explicit heap and stack caps (small caps make
    /// exhaustion testable).
    pub fn with_maxima(program: &Program, heap_max: usize, stack_max: usize) -> Self {
        let stack_top = Address::new(program.initial_sp.to_unsigned() as u32);
        MainMemory {
            text: program.text_segment.clone(),
            text_start: program.text_segment_start,
            data: program.data_segment.clone(),
            data_start: program.data_segment_start,
            heap: HeapSegment::new(program.dynamic_segment_start, heap_max),
            stack: StackSegment::new(stack_top, stack_max),
            stack_top,
            stack_max,
        }
    }

    /// Lowest text-segment address.
    pub fn text_start(&self) -> Address {
        self.text_start
    }

    /// Fetch the statement at `address`.
    pub fn read_from_text(&self, address: Address) -> Result<&Statement, MemoryError> {
        if address.value() % 4 != 0 {
            return Err(MemoryError::MisalignedFetch(address));
        }
        self.text.get(&address).ok_or(MemoryError::InvalidFetch(address))
    }

    /// Move the heap break, returning the old break address.
    pub fn sbrk(&mut self, delta: i64) -> Result<Address, MemoryError> {
        Ok(self.heap.sbrk(delta)?)
    }

    /// Read `length` bytes starting at `address`.
    pub fn read_from_mem(&mut self, address: Address, length: usize) -> Result<Vec<u8>, MemoryError> {
        match self.segment_for(address, length) {
            Some(Segment::StaticData) => {
                let offset = (address.value() - self.data_start.value()) as usize;
                Ok(self.data[offset..offset + length].to_vec())
            }
            Some(Segment::Heap) => {
                let offset = (address.value() - self.heap.base.value()) as usize;
                Ok(self.heap.read(offset, length)?.to_vec())
            }
            Some(Segment::Stack) => Ok(self.stack.read(address, length)?.to_vec()),
            None => Err(MemoryError::InvalidRead { address, length }),
        }
    }

    /// Write `bytes` starting at `address`.
    pub fn write_to_mem(&mut self, address: Address, bytes: &[u8]) -> Result<(), MemoryError> {
        match self.segment_for(address, bytes.len()) {
            Some(Segment::StaticData) => {
                let offset = (address.value() - self.data_start.value()) as usize;
                self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
                Ok(())
            }
            Some(Segment::Heap) => {
                let offset = (address.value() - self.heap.base.value()) as usize;
                Ok(self.heap.write(offset, bytes)?)
            }
            Some(Segment::Stack) => Ok(self.stack.write(address, bytes)?),
            None => Err(MemoryError::InvalidWrite { address, length: bytes.len() }),
        }
    }

    /// Read bytes from `address` up to (not including) the first NUL.
    pub fn read_until_null(&mut self, address: Address) -> Result<Vec<u8>, MemoryError> {
        let mut bytes = Vec::new();
        let mut cursor = address;
        loop {
            let byte = self.read_from_mem(cursor, 1).map_err(|_| {
                // ran off the end of the segment without a terminator
                MemoryError::UnterminatedString(address)
            })?[0];
            if byte == 0 {
                return Ok(bytes);
            }
            bytes.push(byte);
            cursor = cursor.offset(1);
        }
    }

    /// Classify an access; `None` means it fits no single segment.
    fn segment_for(&self, address: Address, length: usize) -> Option<Segment> {
        let start = address.value() as u64;
        let end = start + length as u64;
        let data_start = self.data_start.value() as u64;
        let data_end = data_start + self.data.len() as u64;
        let heap_start = self.heap.base.value() as u64;
        let heap_end = heap_start + self.heap.max as u64;
        let stack_top = self.stack_top.value() as u64;
        let stack_floor = stack_top.saturating_sub(self.stack_max as u64);

        if start >= data_start && end <= data_end {
            Some(Segment::StaticData)
        } else if start >= heap_start && end <= heap_end {
            Some(Segment::Heap)
        } else if start >= stack_floor && start < stack_top {
            // the stack segment reports its own above-top and overflow faults
            Some(Segment::Stack)
        } else {
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
