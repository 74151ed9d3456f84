//! Shadow slot array.
//!
//! Every compiled call site owns one slot: a host-address cell that the return
//! site jumps through. A slot starts out unresolved and is written exactly once,
//! either when the call site is compiled (target already translated) or when
//! the deferred link table sees the target block registered.

use tracing::error;

use crate::common::{AccelError, HostAddr, Result};

/// Index of a shadow slot within its context's slot array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotRef(pub usize);

impl SlotRef {
    /// Slot reference carried by the stack's base entry; never allocated.
    pub const NONE: Self = Self(usize::MAX);
}

/// Fixed-capacity array of shadow slots with a bump allocator.
#[derive(Debug, Clone)]
pub struct SlotArray {
    /// Slot cells; `HostAddr::UNRESOLVED` until linked.
    cells: Vec<HostAddr>,
    /// Next slot to hand out. Never decreases except on `clear`.
    next: usize,
}

impl SlotArray {
    /// Creates a slot array able to serve `capacity` call sites.
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: vec![HostAddr::UNRESOLVED; capacity],
            next: 0,
        }
    }

    /// Hands out the next unused slot.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::SlotsExhausted`] once every slot has been allocated.
    /// The array is left untouched so already-compiled code stays valid.
    pub fn alloc(&mut self) -> Result<SlotRef> {
        if self.next >= self.cells.len() {
            error!(
                capacity = self.cells.len(),
                "shadow slot array exhausted; call site cannot be linked"
            );
            return Err(AccelError::SlotsExhausted {
                capacity: self.cells.len(),
            });
        }
        let slot = SlotRef(self.next);
        self.next += 1;
        Ok(slot)
    }

    /// Reads a slot. Out-of-range references (including [`SlotRef::NONE`]) read as unresolved.
    #[inline(always)]
    pub fn value(&self, slot: SlotRef) -> HostAddr {
        self.cells
            .get(slot.0)
            .copied()
            .unwrap_or(HostAddr::UNRESOLVED)
    }

    /// Writes the host entry point into a slot.
    ///
    /// Returns `false` if the reference is out of range and nothing was written.
    pub fn resolve(&mut self, slot: SlotRef, host: HostAddr) -> bool {
        match self.cells.get_mut(slot.0) {
            Some(cell) => {
                *cell = host;
                true
            }
            None => false,
        }
    }

    /// Number of slots handed out so far.
    pub const fn allocated(&self) -> usize {
        self.next
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Unresolves every slot and rewinds the allocator.
    ///
    /// Only valid together with discarding all translated code.
    pub fn clear(&mut self) {
        self.cells.fill(HostAddr::UNRESOLVED);
        self.next = 0;
    }
}
