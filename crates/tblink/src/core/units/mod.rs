//! Prediction units.
//!
//! This module contains the two control-transfer caches owned by every
//! execution context: the shadow return cache and the indirect branch target
//! cache.

/// Indirect Branch Target Cache for computed jumps and mismatched returns.
pub mod ibtc;

/// Shadow return stack, slot array, and deferred link table.
pub mod shadow;
