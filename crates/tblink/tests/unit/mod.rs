//! # Unit Components
//!
//! Organizes the unit tests by the crate module they exercise.




/// Emitted operation lists and the reference interpreter.
pub mod codegen;
