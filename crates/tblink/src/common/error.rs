//! Error definitions for the link caches.
//!
//! Prediction misses (shadow stack mismatch, unresolved slot, IBTC miss) are
//! ordinary outcomes and are reported through return values, not through this
//! module. What remains are genuine faults:
//! 1. **Capacity:** The shadow slot array ran out of cells.
//! 2. **Configuration:** Invalid or unparsable configuration.
//! 3. **Resolution:** The slow path could neither find nor compile a block.
//! 4. **Lowering:** An operation list that cannot be executed as written.

use thiserror::Error;

use super::addr::GuestAddr;

/// Errors raised by the link caches and their configuration.
#[derive(Debug, Error)]
pub enum AccelError {
    /// Every shadow slot has been handed out to a call site.
    ///
    /// Fatal for the context: translated code holds references to every slot,
    /// so none can be recycled without a full reset.
    #[error("shadow slot array exhausted ({capacity} slots); reset the context or raise shadow.slot_capacity")]
    SlotsExhausted {
        /// Configured slot array capacity.
        capacity: usize,
    },

    /// A configuration value is outside its accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The slow path found no block for a guest address and could not compile one.
    #[error("no translation block for guest address {0}")]
    UnknownBlock(GuestAddr),

    /// An emitted operation list referenced a missing label, an out-of-range
    /// stack index, or a read-only field.
    #[error("malformed operation list: {0}")]
    MalformedOps(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AccelError>;
