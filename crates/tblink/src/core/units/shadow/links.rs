//! Deferred link table.
//!
//! When a call site is compiled before the block at its return address exists,
//! its slot cannot be written yet. The table remembers `(guest address, slot)`
//! pairs in buckets keyed by the jump-cache hash of the address, and hands the
//! slots back when the registry announces the block.

use crate::common::GuestAddr;

use super::slots::SlotRef;

/// A slot waiting for the block at `guest` to be compiled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkNode {
    /// Guest address the slot is waiting for.
    pub guest: GuestAddr,
    /// Slot to backpatch.
    pub slot: SlotRef,
}

/// Hash table of pending links.
#[derive(Debug, Clone)]
pub struct DeferredLinkTable {
    buckets: Vec<Vec<LinkNode>>,
    bits: u32,
    pending: usize,
}

impl DeferredLinkTable {
    /// Creates a table with `1 << bits` buckets.
    pub fn new(bits: u32) -> Self {
        Self {
            buckets: vec![Vec::new(); 1 << bits],
            bits,
            pending: 0,
        }
    }

    #[inline(always)]
    fn bucket(&self, guest: GuestAddr) -> usize {
        guest.jmp_cache_hash(self.bits)
    }

    /// Records that `slot` waits for the block at `guest`.
    pub fn defer(&mut self, guest: GuestAddr, slot: SlotRef) {
        let idx = self.bucket(guest);
        self.buckets[idx].push(LinkNode { guest, slot });
        self.pending += 1;
    }

    /// Removes every node waiting for `guest`, passing each slot to `link`.
    ///
    /// Nodes for other addresses that share the bucket are kept. Returns the
    /// number of nodes consumed.
    pub fn complete(&mut self, guest: GuestAddr, mut link: impl FnMut(SlotRef)) -> usize {
        let idx = self.bucket(guest);
        let bucket = &mut self.buckets[idx];
        let before = bucket.len();
        bucket.retain(|node| {
            if node.guest == guest {
                link(node.slot);
                false
            } else {
                true
            }
        });
        let consumed = before - bucket.len();
        self.pending -= consumed;
        consumed
    }

    /// Number of nodes waiting for `guest`.
    pub fn waiting(&self, guest: GuestAddr) -> usize {
        self.buckets[self.bucket(guest)]
            .iter()
            .filter(|node| node.guest == guest)
            .count()
    }

    /// Total number of pending nodes.
    pub const fn pending(&self) -> usize {
        self.pending
    }

    /// Number of buckets.
    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Drops every pending node.
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(Vec::clear);
        self.pending = 0;
    }
}
