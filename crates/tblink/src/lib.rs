//! Control-transfer caches for a dynamic binary translator.
//!
//! This crate implements the link caches a translator inlines into its
//! translation blocks so that returns and indirect jumps can skip the dispatcher:
//! 1. **Shadow stack:** Return-address prediction with per-call-site slots and deferred linking.
//! 2. **IBTC:** A direct-mapped indirect branch target cache with a dispatcher-side update.
//! 3. **Codegen:** The runtime half of each protocol as an operation IR, plus a reference interpreter.
//! 4. **Engine:** A registry and context pair that models the dispatcher's slow path.
//! 5. **Support:** Configuration, error types, and statistics collection.

/// Runtime operation IR, protocol compilers, and the reference interpreter.
pub mod codegen;
/// Common types and constants (addresses, table geometry, errors).
pub mod common;
/// Configuration (defaults, overflow policy, hierarchical config structures).
pub mod config;
/// Execution context and the cache units it owns.
pub mod core;
/// TB registry boundary and a hash-map registry.
pub mod registry;
/// Dispatcher model driving a registry and a context together.
pub mod sim;
/// Cache statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or parse with `Config::from_json`.
pub use crate::config::Config;
/// Per-CPU cache state implementing every protocol.
pub use crate::core::ExecContext;
/// Guest and host address types and the crate error.
pub use crate::common::{AccelError, GuestAddr, HostAddr};
/// Block handles and the registry boundary.
pub use crate::registry::{BlockMap, BlockRef, TbRegistry};
/// Dispatcher model.
pub use crate::sim::Engine;
