//! Shadow return cache.
//!
//! This module contains the three structures behind return prediction:
//! the shadow stack itself, the slot array its entries point into, and the
//! deferred link table that backpatches slots once their target is compiled.

/// Per-guest-address queue of slots awaiting a block.
pub mod links;

/// Host-address cells allocated one per call site.
pub mod slots;

/// LIFO stack of expected return addresses.
pub mod stack;

pub use self::links::{DeferredLinkTable, LinkNode};
pub use self::slots::{SlotArray, SlotRef};
pub use self::stack::{ShadowEntry, ShadowStack};
