//! The transaction engine: propagation decisions, commit/rollback
//! coordination, and suspend/resume of scope state.

pub mod manager;

mod coordinator;
mod propagation;
mod suspend;

// Re-export commonly used types
pub use manager::{SynchronizationPolicy, TransactionManager};
