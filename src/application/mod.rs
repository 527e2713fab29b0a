//! Application layer: reconciliation, registry merging, and use cases

pub mod errors;
pub mod reconciler;
pub mod registry;
pub mod use_cases;
