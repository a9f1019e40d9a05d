pub mod access;
pub mod error;
pub mod pipeline;
pub mod schedule;
pub mod schema_inference;
pub mod validation;
pub mod worktask;

// Convenient re-export for callers elsewhere in the crate.
pub use error::DomainError;
