//! Translation Block registry boundary.
//!
//! The global TB table lives outside this crate. The caches only need to ask
//! it one question (is there a block for this guest address?) and to be told
//! whenever a new block appears. This module defines:
//! 1. **`BlockRef`:** A non-owning handle to a compiled block.
//! 2. **`TbRegistry`:** The lookup side of the boundary.
//! 3. **`BlockMap`:** A plain hash-map registry used by the engine and tests.

use std::collections::HashMap;

use crate::common::{GuestAddr, HostAddr};

/// Reference to a compiled translation block.
///
/// The registry owns the block; this handle only records where its guest code
/// starts and where its host code can be entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockRef {
    /// Guest address of the first translated instruction.
    pub guest: GuestAddr,
    /// Host entry point of the compiled code.
    pub host: HostAddr,
}

impl BlockRef {
    /// Creates a new block reference.
    pub const fn new(guest: GuestAddr, host: HostAddr) -> Self {
        Self { guest, host }
    }
}

/// Lookup interface onto the global TB table.
///
/// Implementations must be cheap enough to call once per compiled call site.
/// Registration is deliberately not part of the trait: whoever registers a block
/// must also call [`ExecContext::on_block_registered`](crate::core::ExecContext::on_block_registered).
pub trait TbRegistry {
    /// Returns the block compiled for `guest`, if one exists.
    fn lookup_block(&self, guest: GuestAddr) -> Option<BlockRef>;
}

/// Hash-map backed registry.
#[derive(Debug, Default, Clone)]
pub struct BlockMap {
    blocks: HashMap<GuestAddr, BlockRef>,
}

impl BlockMap {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `block`, returning the block it displaced at the same guest address.
    pub fn insert(&mut self, block: BlockRef) -> Option<BlockRef> {
        self.blocks.insert(block.guest, block)
    }

    /// Number of registered blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if no block has been registered.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl TbRegistry for BlockMap {
    fn lookup_block(&self, guest: GuestAddr) -> Option<BlockRef> {
        self.blocks.get(&guest).copied()
    }
}

impl<R: TbRegistry + ?Sized> TbRegistry for &R {
    fn lookup_block(&self, guest: GuestAddr) -> Option<BlockRef> {
        (**self).lookup_block(guest)
    }
}
