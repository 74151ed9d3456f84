//! Global Cache Constants.
//!
//! This module defines constants shared across the link caches. It includes:
//! 1. **Shadow Stack Sizing:** Default stack depth and shadow slot capacity.
//! 2. **Hash Geometry:** Default bucket counts for the deferred link table and IBTC.
//! 3. **Sentinels:** Reserved guest addresses and stack indices.

/// Default number of entries in a shadow return stack (16 Ki).
pub const SHACK_SIZE: usize = 16 * 1024;

/// Default number of shadow slots a context may allocate (16 Ki).
///
/// Every compiled call site consumes one slot for the lifetime of the
/// translated code, so this bounds the number of call sites between full
/// context resets.
pub const SHADOW_SLOT_CAPACITY: usize = 16 * 1024;

/// Default log2 bucket count of the deferred link table (4096 buckets).
pub const TB_JMP_CACHE_BITS: u32 = 12;

/// Default log2 entry count of the indirect branch target cache (64 Ki entries).
pub const IBTC_CACHE_BITS: u32 = 16;

/// Largest accepted log2 size for any hashed table.
pub const MAX_TABLE_BITS: u32 = 24;

/// Expected address stored in the base entry of every shadow stack.
///
/// No guest instruction lives at this address on any supported target, so a
/// pop that reaches the base entry always mismatches and falls through.
pub const SHACK_BASE_GUEST: u64 = u64::MAX;

/// Stack index of the base (sentinel) entry.
pub const SHACK_BASE: usize = 0;
