//! Guest and Host Address types.
//!
//! This module defines strong types for the two address spaces a binary
//! translator juggles. It provides the following:
//! 1. **Type Safety:** Distinguishes guest instruction addresses from host code addresses at compile time.
//! 2. **Cache Indexing:** Helpers for the low-order-bit and jump-cache hashes used by the link caches.
//! 3. **Sentinels:** The "unresolved" host address stored in shadow slots before linking.

use std::fmt;

/// An instruction address in the emulated (guest) architecture.
///
/// Guest addresses key every cache in this crate. They are never dereferenced;
/// the TB registry owns the mapping from a guest address to compiled code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GuestAddr(pub u64);

/// An address of compiled native (host) code.
///
/// The value zero is reserved as [`HostAddr::UNRESOLVED`] and is what a shadow
/// slot holds until the block it waits for has been linked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostAddr(pub u64);

impl GuestAddr {
    /// Creates a new guest address from a raw 64-bit value.
    ///
    /// # Arguments
    ///
    /// * `addr` - The raw 64-bit address value.
    ///
    /// # Returns
    ///
    /// A new `GuestAddr` instance wrapping the provided address.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(&self) -> u64 {
        self.0
    }

    /// Returns the low-order `bits` of the address as a table index.
    ///
    /// Used by the direct-mapped IBTC. `bits` must be below 64.
    #[inline(always)]
    pub const fn low_bits(&self, bits: u32) -> usize {
        (self.0 & ((1u64 << bits) - 1)) as usize
    }

    /// Computes the jump-cache hash of the address for a table of `1 << bits` buckets.
    ///
    /// Folds the upper half of the index bits down onto the lower half so that
    /// return points in different pages with the same offset land in different
    /// buckets. `bits` must be in `1..64`.
    #[inline(always)]
    pub const fn jmp_cache_hash(&self, bits: u32) -> usize {
        let pc = self.0;
        (((pc >> (bits / 2)) ^ pc) & ((1u64 << bits) - 1)) as usize
    }
}

impl HostAddr {
    /// Value held by a shadow slot that has not been linked yet.
    pub const UNRESOLVED: Self = Self(0);

    /// Creates a new host code address from a raw 64-bit value.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(&self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the unresolved sentinel.
    #[inline(always)]
    pub const fn is_unresolved(&self) -> bool {
        self.0 == Self::UNRESOLVED.0
    }
}

impl fmt::Display for GuestAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for GuestAddr {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}

impl From<u64> for HostAddr {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}
