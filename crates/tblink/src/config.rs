//! Configuration system for the link caches.
//!
//! This module defines all configuration structures and enums used to size and
//! tune an execution context. It provides:
//! 1. **Defaults:** Baseline geometry for the shadow stack, slot array, link table, and IBTC.
//! 2. **Structures:** Hierarchical config for general, shadow stack, and IBTC settings.
//! 3. **Enums:** Shadow stack overflow policy.
//! 4. **Validation:** Range checks performed before a context is built.
//!
//! Configuration is supplied as JSON by the embedding translator or built with `Config::default()`.

use serde::Deserialize;

use crate::common::constants::{IBTC_CACHE_BITS, MAX_TABLE_BITS, SHACK_SIZE, SHADOW_SLOT_CAPACITY, TB_JMP_CACHE_BITS};
use crate::common::error::{AccelError, Result};

/// Default configuration constants.
///
/// These values are used when a field is absent from the JSON document.
mod defaults {
    use super::{IBTC_CACHE_BITS, SHACK_SIZE, SHADOW_SLOT_CAPACITY, TB_JMP_CACHE_BITS};

    /// Shadow stack depth in entries.
    pub const STACK_SIZE: usize = SHACK_SIZE;

    /// Shadow slot array capacity.
    pub const SLOT_CAPACITY: usize = SHADOW_SLOT_CAPACITY;

    /// Deferred link table size (log2 buckets).
    pub const LINK_TABLE_BITS: u32 = TB_JMP_CACHE_BITS;

    /// IBTC size (log2 entries).
    pub const IBTC_BITS: u32 = IBTC_CACHE_BITS;
}

/// What the push protocol does when the shadow stack is full.
///
/// Either way the outcome is a lost prediction, never a wrong one: a pop that
/// finds an unexpected entry mismatches and takes the slow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OverflowPolicy {
    /// Discard every live entry and restart just past the base.
    ///
    /// The cheapest policy to emit: one compare and one constant load.
    #[default]
    #[serde(alias = "RESET", alias = "reset")]
    Reset,
    /// Treat the stack as a ring and overwrite the oldest entry once it is full.
    ///
    /// Keeps the most recent `stack_size` frames predictable through deep
    /// recursion. The stack counts its valid entries, so pops only wrap from the
    /// first entry back to the last one while older frames remain.
    #[serde(alias = "WRAP", alias = "wrap")]
    Wrap,
}

/// Root configuration structure.
///
/// # Example
///
/// ```
/// use tblink_core::config::{Config, OverflowPolicy};
///
/// let json = r#"{
///     "general": { "trace_transfers": true },
///     "shadow": { "stack_size": 64, "overflow": "Wrap" },
///     "ibtc": { "index_bits": 10 }
/// }"#;
///
/// let config = Config::from_json(json).unwrap();
/// assert!(config.general.trace_transfers);
/// assert_eq!(config.shadow.stack_size, 64);
/// assert_eq!(config.shadow.overflow, OverflowPolicy::Wrap);
/// assert_eq!(config.ibtc.index_bits, 10);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Shadow return stack and deferred link configuration
    #[serde(default)]
    pub shadow: ShadowConfig,
    /// Indirect branch target cache configuration
    #[serde(default)]
    pub ibtc: IbtcConfig,
}

impl Config {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::Config`] when the document is malformed and
    /// [`AccelError::InvalidConfig`] when a value is out of range.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.shadow.stack_size == 0 {
            return Err(AccelError::InvalidConfig(
                "shadow.stack_size must be at least 1".to_string(),
            ));
        }
        if self.shadow.slot_capacity == 0 {
            return Err(AccelError::InvalidConfig(
                "shadow.slot_capacity must be at least 1".to_string(),
            ));
        }
        check_bits("shadow.link_table_bits", self.shadow.link_table_bits)?;
        check_bits("ibtc.index_bits", self.ibtc.index_bits)?;
        Ok(())
    }
}

/// Rejects table sizes outside `1..=MAX_TABLE_BITS`.
fn check_bits(field: &str, bits: u32) -> Result<()> {
    if (1..=MAX_TABLE_BITS).contains(&bits) {
        Ok(())
    } else {
        Err(AccelError::InvalidConfig(format!(
            "{field} must be in 1..={MAX_TABLE_BITS}, got {bits}"
        )))
    }
}

/// General settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneralConfig {
    /// Emit a `trace!` event for every shadow pop and IBTC lookup.
    #[serde(default)]
    pub trace_transfers: bool,
}

/// Shadow return stack configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ShadowConfig {
    /// Number of usable stack entries (the base sentinel is extra).
    #[serde(default = "ShadowConfig::default_stack_size")]
    pub stack_size: usize,

    /// Number of shadow slots available to call sites.
    #[serde(default = "ShadowConfig::default_slot_capacity")]
    pub slot_capacity: usize,

    /// Deferred link table size as log2 of the bucket count.
    #[serde(default = "ShadowConfig::default_link_table_bits")]
    pub link_table_bits: u32,

    /// Behaviour when a push finds the stack full.
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl ShadowConfig {
    fn default_stack_size() -> usize {
        defaults::STACK_SIZE
    }

    fn default_slot_capacity() -> usize {
        defaults::SLOT_CAPACITY
    }

    fn default_link_table_bits() -> u32 {
        defaults::LINK_TABLE_BITS
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            stack_size: defaults::STACK_SIZE,
            slot_capacity: defaults::SLOT_CAPACITY,
            link_table_bits: defaults::LINK_TABLE_BITS,
            overflow: OverflowPolicy::Reset,
        }
    }
}

/// Indirect branch target cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IbtcConfig {
    /// Table size as log2 of the entry count; the index is this many low bits of the target.
    #[serde(default = "IbtcConfig::default_index_bits")]
    pub index_bits: u32,
}

impl IbtcConfig {
    fn default_index_bits() -> u32 {
        defaults::IBTC_BITS
    }
}

impl Default for IbtcConfig {
    fn default() -> Self {
        Self {
            index_bits: defaults::IBTC_BITS,
        }
    }
}
