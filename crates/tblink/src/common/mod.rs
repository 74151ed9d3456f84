//! Common utilities and types used throughout the link caches.
//!
//! This module provides the fundamental building blocks shared by every unit:
//! 1. **Address Types:** Strong types for guest and host addresses.
//! 2. **Constants:** Default geometry and reserved sentinel values.
//! 3. **Error Handling:** The crate error type and result alias.

/// Address type definitions (guest and host addresses).
pub mod addr;

/// Common constants used throughout the crate.
pub mod constants;

/// Error types.
pub mod error;

pub use addr::{GuestAddr, HostAddr};
pub use constants::{IBTC_CACHE_BITS, SHACK_SIZE, SHADOW_SLOT_CAPACITY, TB_JMP_CACHE_BITS};
pub use error::{AccelError, Result};
