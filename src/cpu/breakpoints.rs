//! Source-level breakpoints.
//!
//! Breakpoints are owned by the CPU that honours them, not by any global
//! registry. Users set them by source line; each line resolves to the
//! lowest statement address at or after that line (a breakpoint on a blank
//! line lands on the next real statement). Resolution is re-done whenever
//! a different program is supplied; re-loading the *same* program (same
//! [`Arc`]) keeps the existing resolution untouched.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::program::{Address, Program};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakpointError {
    #[error("no program is loaded, so breakpoints cannot be resolved")]
    NoProgram,
}

/// The breakpoint set for one CPU.
#[derive(Default)]
pub struct Breakpoints {
    program: Option<Arc<Program>>,
    /// Lines the user asked to break on.
    lines: HashSet<usize>,
    /// Addresses the user asked to break on directly.
    addresses: HashSet<Address>,
    /// Lowest statement address per source line, for ceiling lookups.
    line_to_address: BTreeMap<usize, Address>,
    /// Union of direct addresses and resolved line breakpoints.
    resolved: HashSet<Address>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Breakpoints::default()
    }

    /// Tell the breakpoint set which program addresses refer to.
    ///
    /// Line breakpoints survive a program change and are re-resolved
    /// against the new statement layout. Supplying the program already in
    /// effect is a no-op.
    pub fn specify_program(&mut self, program: &Arc<Program>) {
        if let Some(current) = &self.program {
            if Arc::ptr_eq(current, program) {
                return;
            }
        }
        self.program = Some(Arc::clone(program));
        self.line_to_address.clear();
        for (address, statement) in &program.text_segment {
            self.line_to_address
                .entry(statement.line_number)
                .or_insert(*address);
        }
        self.resolve();
    }

    /// Set a breakpoint on a source line.
    pub fn add_line(&mut self, line: usize) {
        self.lines.insert(line);
        self.resolve();
    }

    /// Clear a line breakpoint.
    pub fn remove_line(&mut self, line: usize) {
        self.lines.remove(&line);
        self.resolve();
    }

    /// Toggle a line breakpoint, returning whether it is now set.
    pub fn toggle_line(&mut self, line: usize) -> bool {
        let set = if self.lines.contains(&line) {
            self.lines.remove(&line);
            false
        } else {
            self.lines.insert(line);
            true
        };
        self.resolve();
        set
    }

    /// Set a breakpoint directly on a statement address.
    pub fn add_address(&mut self, address: Address) {
        self.addresses.insert(address);
        self.resolve();
    }

    pub fn remove_address(&mut self, address: Address) {
        self.addresses.remove(&address);
        self.resolve();
    }

    /// The lines currently carrying breakpoints.
    pub fn lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.lines.iter().copied()
    }

    /// The statement address a line breakpoint lands on, if any.
    pub fn resolve_line(&self, line: usize) -> Option<Address> {
        self.line_to_address.range(line..).next().map(|(_, a)| *a)
    }

    /// Should execution pause before the statement at `address`?
    pub fn should_break(&self, address: Address) -> Result<bool, BreakpointError> {
        if self.program.is_none() {
            return Err(BreakpointError::NoProgram);
        }
        Ok(self.resolved.contains(&address))
    }

    fn resolve(&mut self) {
        self.resolved = self.addresses.iter().copied().collect();
        for line in &self.lines {
            if let Some(address) = self.resolve_line(*line) {
                self.resolved.insert(address);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
