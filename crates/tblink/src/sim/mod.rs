//! Dispatcher model.
//!
//! Provides an engine that owns a TB registry and an execution context side
//! by side and drives them the way a translator's dispatch loop does: call
//! sites are compiled once, returns and indirect jumps try the caches first,
//! and the slow path resolves (or compiles) the real target.

/// Registry + context engine with slow-path resolution.
pub mod engine;

pub use self::engine::{Engine, Transfer};
