//! The matchpoint registry.
//!
//! Records, per installed software breakpoint, the instruction word that was
//! overwritten by the trap instruction, so `z` packets can restore it. The
//! registry never touches target memory itself; the `Z`/`z` handlers do.

use std::collections::HashMap;

use crate::target::MatchKind;

/// Multi-map keyed on the full `(kind, addr, len)` triple. Overlapping but
/// non-identical ranges are independent entries.
pub struct MatchpointTable {
    entries: HashMap<(MatchKind, u64, u64), u32>,
}

impl MatchpointTable {
    pub fn new() -> MatchpointTable {
        MatchpointTable {
            entries: HashMap::new(),
        }
    }

    /// Record a matchpoint. Re-inserting an existing key is a no-op: the
    /// first saved instruction is the real one, since the memory now holds a
    /// trap.
    pub fn insert(&mut self, kind: MatchKind, addr: u64, len: u64, instr: u32) {
        self.entries.entry((kind, addr, len)).or_insert(instr);
    }

    pub fn remove(&mut self, kind: MatchKind, addr: u64, len: u64) -> Option<u32> {
        self.entries.remove(&(kind, addr, len))
    }

    pub fn lookup(&self, kind: MatchKind, addr: u64, len: u64) -> Option<u32> {
        self.entries.get(&(kind, addr, len)).copied()
    }

    /// Drop everything (target reset).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
