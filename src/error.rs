//! Transaction engine error types.

use thiserror::Error;

use crate::definition::FailureKind;

/// Errors that can occur while driving a transaction.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// A definition carried a negative, non-default timeout.
    #[error("Invalid transaction timeout: {0}")]
    InvalidTimeout(i64),

    /// The requested operation is incompatible with the current scope state,
    /// e.g. double commit, or a propagation violation.
    #[error("Illegal transaction state: {0}")]
    IllegalState(String),

    /// A nested transaction was requested but is disallowed or unsupported.
    #[error("Nested transaction not supported: {0}")]
    NestedNotSupported(String),

    /// Suspend/resume was requested on a resource that cannot do either.
    #[error("Transaction suspension is not supported by the underlying resource")]
    SuspensionNotSupported,

    /// A global rollback-only marker was observed at commit time with no
    /// corresponding failure explaining the abort.
    #[error("Transaction rolled back because it has been marked as rollback-only")]
    UnexpectedRollback,

    /// A physical commit/rollback operation itself failed.
    #[error("Transaction system failure during {context}: {source}")]
    System {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A failure raised by a resource adapter hook.
    #[error("Resource error: {0}")]
    Resource(#[from] anyhow::Error),

    /// The unit of work itself failed; the transaction outcome was decided
    /// by the definition's rollback classification.
    #[error("Unit of work failed ({kind} failure): {source}")]
    WorkFailed {
        kind: FailureKind,
        #[source]
        source: anyhow::Error,
    },
}

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;
