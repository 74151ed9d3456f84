//! Shadow return stack.
//!
//! Mirrors the guest's call nesting so that a return can jump straight to the
//! host code of its caller's continuation. Entries pair the statically known
//! return address of a call site with the slot that will hold its host target.
//!
//! Index 0 is a permanent base entry. The stack is empty when `top` is the base;
//! usable entries live at `1..=capacity`, and `end` is one past the last one.
//!
//! Under [`OverflowPolicy::Wrap`] the usable entries form a ring and `live`
//! counts how many of them, ending at `top`, are still valid. `top` is the base
//! exactly when `live` is zero.

use crate::common::GuestAddr;
use crate::common::constants::{SHACK_BASE, SHACK_BASE_GUEST};
use crate::config::OverflowPolicy;

use super::slots::SlotRef;

/// One shadow stack entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShadowEntry {
    /// Return address the call site expects control to come back to.
    pub expected: GuestAddr,
    /// Slot holding the host entry point for `expected`.
    pub slot: SlotRef,
}

impl ShadowEntry {
    /// Base entry; its expected address never matches a real return.
    pub const BASE: Self = Self {
        expected: GuestAddr(SHACK_BASE_GUEST),
        slot: SlotRef::NONE,
    };
}

/// Shadow return stack structure.
#[derive(Debug, Clone)]
pub struct ShadowStack {
    /// Entry storage; `entries[SHACK_BASE]` is the base entry.
    entries: Vec<ShadowEntry>,
    /// Index of the most recently pushed entry, or `SHACK_BASE` when empty.
    top: usize,
    /// Valid entries reachable by popping (ring mode only).
    live: usize,
    /// Capacity-exceeded behaviour.
    policy: OverflowPolicy,
}

impl ShadowStack {
    /// Creates an empty shadow stack with room for `capacity` entries.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Usable entries, excluding the base. Must be at least 1.
    /// * `policy` - What a push does when the stack is full.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            entries: vec![ShadowEntry::BASE; capacity + 1],
            top: SHACK_BASE,
            live: 0,
            policy,
        }
    }

    /// Number of usable entries.
    pub fn capacity(&self) -> usize {
        self.entries.len() - 1
    }

    /// One past the last usable index; a push that reaches it overflows.
    pub fn end(&self) -> usize {
        self.entries.len()
    }

    /// Current top index.
    #[inline(always)]
    pub const fn top(&self) -> usize {
        self.top
    }

    /// Overflow policy this stack was built with.
    pub const fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Returns `true` if no entry is reachable from the top.
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.top == SHACK_BASE
    }

    /// Reads the entry at `index`, if it is inside the stack.
    #[inline(always)]
    pub fn entry(&self, index: usize) -> Option<ShadowEntry> {
        self.entries.get(index).copied()
    }

    /// The entry at the top (the base entry when empty).
    #[inline(always)]
    pub fn peek(&self) -> ShadowEntry {
        self.entries[self.top]
    }

    /// Number of entries a run of pops can still return.
    #[inline(always)]
    pub const fn live(&self) -> usize {
        match self.policy {
            OverflowPolicy::Reset => self.top,
            OverflowPolicy::Wrap => self.live,
        }
    }

    /// Index the next push lands on, and whether that push discards a valid entry.
    ///
    /// Both policies restart just past the base when the top reaches `end`.
    /// Under `Reset` that always drops every older entry; under `Wrap` it only
    /// overwrites something when the ring is full.
    #[inline(always)]
    pub fn advance(&self) -> (usize, bool) {
        let next = self.top + 1;
        let (next, wrapped) = if next < self.end() {
            (next, false)
        } else {
            (SHACK_BASE + 1, true)
        };
        let overflowed = match self.policy {
            OverflowPolicy::Reset => wrapped,
            OverflowPolicy::Wrap => self.live == self.capacity(),
        };
        (next, overflowed)
    }

    /// Index the top retreats to when the current top entry is popped.
    ///
    /// Under `Wrap` the top steps from the first entry back to the last one
    /// only while older valid entries remain; popping the last valid entry
    /// returns to the base.
    #[inline(always)]
    pub fn retreat(&self) -> usize {
        match self.policy {
            OverflowPolicy::Reset => self.top.saturating_sub(1),
            OverflowPolicy::Wrap if self.live <= 1 => SHACK_BASE,
            OverflowPolicy::Wrap if self.top == SHACK_BASE + 1 => self.capacity(),
            OverflowPolicy::Wrap => self.top - 1,
        }
    }

    /// Pushes an entry. Returns `true` if the push discarded a valid entry.
    pub fn push(&mut self, entry: ShadowEntry) -> bool {
        let (next, overflowed) = self.advance();
        self.entries[next] = entry;
        self.top = next;
        if self.policy == OverflowPolicy::Wrap && !overflowed {
            self.live += 1;
        }
        overflowed
    }

    /// Drops the top entry. Does nothing on an empty stack.
    pub fn pop(&mut self) {
        if self.is_empty() {
            return;
        }
        self.top = self.retreat();
        if self.policy == OverflowPolicy::Wrap {
            self.live = self.live.saturating_sub(1);
        }
    }

    /// Stores an entry at an arbitrary index. Returns `false` if out of range.
    pub(crate) fn write(&mut self, index: usize, entry: ShadowEntry) -> bool {
        match self.entries.get_mut(index) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    /// Moves the top. Returns `false` and leaves the top alone if out of range.
    pub(crate) fn set_top(&mut self, index: usize) -> bool {
        if index < self.end() {
            self.top = index;
            true
        } else {
            false
        }
    }

    /// Sets the ring's valid-entry count. Returns `false` if it exceeds the capacity.
    pub(crate) fn set_live(&mut self, live: usize) -> bool {
        if live <= self.capacity() {
            self.live = live;
            true
        } else {
            false
        }
    }

    /// Empties the stack in constant time.
    ///
    /// Entries are left in place; with no live entries a pop can never reach them.
    pub fn flush(&mut self) {
        self.top = SHACK_BASE;
        self.live = 0;
    }
}
