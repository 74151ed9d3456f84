//! Indirect Branch Target Cache (IBTC).
//!
//! The IBTC is a direct-mapped cache from guest jump targets to compiled blocks.
//! It is indexed by the low-order bits of the target and verified by comparing
//! the full stored address, so an aliasing occupant is only ever a miss.

use crate::common::{GuestAddr, HostAddr};
use crate::registry::BlockRef;

/// IBTC structure.
#[derive(Debug, Clone)]
pub struct Ibtc {
    /// One block per index; `None` until first written.
    table: Vec<Option<BlockRef>>,
    /// log2 of the table size.
    bits: u32,
}

impl Ibtc {
    /// Creates an empty IBTC with `1 << bits` entries.
    pub fn new(bits: u32) -> Self {
        Self {
            table: vec![None; 1 << bits],
            bits,
        }
    }

    /// Table index for a guest address: its low-order `bits`.
    #[inline(always)]
    pub const fn index(&self, guest: GuestAddr) -> usize {
        guest.low_bits(self.bits)
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        self.table.len()
    }

    /// Looks up the host entry point cached for `target`.
    ///
    /// # Returns
    ///
    /// The host entry if the entry at the target's index was stored for exactly
    /// this address, otherwise `None`.
    #[inline(always)]
    pub fn lookup(&self, target: GuestAddr) -> Option<HostAddr> {
        match self.table[self.index(target)] {
            Some(block) if block.guest == target => Some(block.host),
            _ => None,
        }
    }

    /// Installs `block` at its index, replacing whatever was there.
    ///
    /// # Returns
    ///
    /// The previous occupant if it belonged to a different guest address.
    pub fn update(&mut self, block: BlockRef) -> Option<BlockRef> {
        let idx = self.index(block.guest);
        self.table[idx]
            .replace(block)
            .filter(|old| old.guest != block.guest)
    }

    /// Returns the block stored at `index`, if any.
    pub fn entry(&self, index: usize) -> Option<BlockRef> {
        self.table.get(index).copied().flatten()
    }

    /// Empties every entry.
    pub fn clear(&mut self) {
        self.table.fill(None);
    }
}
