//! Transaction synchronization: lifecycle callbacks and the per-scope
//! registry that holds them.

pub mod callback;
pub mod registry;

// Re-export commonly used types
pub use callback::{CompletionStatus, TransactionSynchronization, ORDER_DEFAULT};
pub use registry::{SharedSynchronization, SynchronizationRegistry};
