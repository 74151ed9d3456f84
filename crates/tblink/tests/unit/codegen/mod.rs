/// Exact operation lists produced by the protocol compilers.
pub mod emit;
