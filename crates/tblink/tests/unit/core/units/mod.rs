

/// Shadow stack tests.
pub mod shadow_stack;
