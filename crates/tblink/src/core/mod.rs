//! Execution context and prediction units.
//!
//! This module contains the per-context state that the translator and the
//! dispatcher drive: the shadow return cache, the IBTC, the miss flag, and the
//! `ExecContext` that owns them and implements every cache protocol.

/// Execution context owning all per-CPU cache state.
pub mod context;

/// Prediction units (shadow return cache, IBTC).
pub mod units;

pub use self::context::{ExecContext, PushSite, ReturnPrediction};
