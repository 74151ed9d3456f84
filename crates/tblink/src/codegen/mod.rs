//! Code generator interface.
//!
//! The cache protocols are emitted into translation blocks rather than called.
//! This module provides:
//! 1. **IR:** The closed set of runtime operations a backend must lower.
//! 2. **Protocol compilers:** Push, pop, IBTC lookup, and flush emitters.
//! 3. **Interpreter:** A reference lowering that runs the IR against a context.

/// Reference interpreter for the runtime IR.
pub mod interp;

/// Runtime operation IR and block builder.
pub mod ops;

/// Emitters for each cache protocol.
pub mod protocol;

pub use self::interp::{Exit, Machine};
pub use self::ops::{Op, OpBuilder, Temp};
pub use self::protocol::{emit_flush, emit_ibtc_lookup, emit_pop, emit_push};
