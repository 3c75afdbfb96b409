//! Transaction definitions: propagation behavior, isolation, and rollback
//! classification rules.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransactionError};

/// How a transaction request relates to an already-active transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Propagation {
    /// Join the current transaction, or start a new one if none exists.
    Required,
    /// Always start a new transaction, suspending the current one if present.
    RequiresNew,
    /// Run within a nested scope of the current transaction (savepoint-based
    /// where the resource supports it), or start a new one if none exists.
    Nested,
    /// Join the current transaction if present, otherwise run without one.
    Supports,
    /// Run without a transaction, suspending the current one if present.
    NotSupported,
    /// Run without a transaction; fail if one is already active.
    Never,
    /// Join the current transaction; fail if none exists.
    Mandatory,
}

impl Default for Propagation {
    fn default() -> Self {
        Self::Required
    }
}

/// Isolation level requested for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Isolation {
    /// Use the resource's default isolation level.
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Default for Isolation {
    fn default() -> Self {
        Self::Default
    }
}

/// Closed set of failure categories used for rollback classification.
///
/// These replace language-specific exception taxonomies: a unit of work tags
/// its failure with a kind, and the definition's rollback rules decide
/// whether the transaction rolls back or commits through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// An unexpected failure (bug, resource breakage). Rolls back by default.
    Runtime,
    /// A declared business failure. Commits through by default.
    Checked,
    /// The unit of work was cancelled. Rolls back by default.
    Cancelled,
}

impl FailureKind {
    /// Default rollback behavior for this category, absent explicit rules.
    pub fn rolls_back_by_default(self) -> bool {
        !matches!(self, Self::Checked)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runtime => write!(f, "runtime"),
            Self::Checked => write!(f, "checked"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Immutable request describing the transaction a unit of work wants.
///
/// Created once per call site and handed to
/// [`TransactionManager::get_transaction`](crate::engine::TransactionManager::get_transaction)
/// or [`execute`](crate::engine::TransactionManager::execute).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDefinition {
    /// Propagation behavior relative to an existing transaction.
    pub propagation: Propagation,
    /// Requested isolation level.
    pub isolation: Isolation,
    /// Advisory timeout in seconds, forwarded to the resource's begin hook.
    /// `None` means the resource default.
    pub timeout_secs: Option<i64>,
    /// Whether the unit of work only reads.
    pub read_only: bool,
    /// Optional name, exposed through the synchronization registry.
    pub name: Option<String>,
    /// Categories that force a rollback even if they commit through by default.
    pub rollback_on: Vec<FailureKind>,
    /// Categories that commit through even if they roll back by default.
    /// Takes precedence over `rollback_on`.
    pub no_rollback_on: Vec<FailureKind>,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation: Isolation::Default,
            timeout_secs: None,
            read_only: false,
            name: None,
            rollback_on: Vec::new(),
            no_rollback_on: Vec::new(),
        }
    }
}

impl TransactionDefinition {
    /// Creates a definition with the given propagation and defaults otherwise.
    pub fn new(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Self::default()
        }
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: i64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rollback_on(mut self, kind: FailureKind) -> Self {
        self.rollback_on.push(kind);
        self
    }

    pub fn with_no_rollback_on(mut self, kind: FailureKind) -> Self {
        self.no_rollback_on.push(kind);
        self
    }

    /// Validates the definition. Fails with
    /// [`TransactionError::InvalidTimeout`] for a negative timeout.
    pub fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.timeout_secs {
            if timeout < 0 {
                return Err(TransactionError::InvalidTimeout(timeout));
            }
        }
        Ok(())
    }

    /// Decides whether a failure of the given kind rolls the transaction
    /// back. Explicit `no_rollback_on` entries win over `rollback_on`
    /// entries, which win over the category default.
    pub fn should_rollback_on(&self, kind: FailureKind) -> bool {
        if self.no_rollback_on.contains(&kind) {
            return false;
        }
        if self.rollback_on.contains(&kind) {
            return true;
        }
        kind.rolls_back_by_default()
    }
}

/// A categorized failure raised by a unit of work.
#[derive(Debug)]
pub struct WorkFailure {
    /// The failure category, used for rollback classification.
    pub kind: FailureKind,
    /// The underlying failure.
    pub source: anyhow::Error,
}

impl WorkFailure {
    pub fn new(kind: FailureKind, source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn runtime(source: impl Into<anyhow::Error>) -> Self {
        Self::new(FailureKind::Runtime, source)
    }

    pub fn checked(source: impl Into<anyhow::Error>) -> Self {
        Self::new(FailureKind::Checked, source)
    }

    pub fn cancelled(source: impl Into<anyhow::Error>) -> Self {
        Self::new(FailureKind::Cancelled, source)
    }
}

impl std::fmt::Display for WorkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_definition() {
        let def = TransactionDefinition::default();
        assert_eq!(def.propagation, Propagation::Required);
        assert_eq!(def.isolation, Isolation::Default);
        assert!(def.timeout_secs.is_none());
        assert!(!def.read_only);
        assert!(def.name.is_none());
    }

    #[test]
    fn test_validate_rejects_negative_timeout() {
        let def = TransactionDefinition::default().with_timeout_secs(-1);
        assert!(matches!(
            def.validate(),
            Err(TransactionError::InvalidTimeout(-1))
        ));

        let def = TransactionDefinition::default().with_timeout_secs(30);
        assert!(def.validate().is_ok());

        // Unset timeout is always valid.
        assert!(TransactionDefinition::default().validate().is_ok());
    }

    #[test]
    fn test_default_rollback_classification() {
        let def = TransactionDefinition::default();
        assert!(def.should_rollback_on(FailureKind::Runtime));
        assert!(def.should_rollback_on(FailureKind::Cancelled));
        assert!(!def.should_rollback_on(FailureKind::Checked));
    }

    #[test]
    fn test_rollback_on_overrides_default() {
        let def = TransactionDefinition::default().with_rollback_on(FailureKind::Checked);
        assert!(def.should_rollback_on(FailureKind::Checked));
    }

    #[test]
    fn test_no_rollback_on_wins() {
        let def = TransactionDefinition::default()
            .with_rollback_on(FailureKind::Runtime)
            .with_no_rollback_on(FailureKind::Runtime);
        assert!(!def.should_rollback_on(FailureKind::Runtime));
    }

    #[test]
    fn test_work_failure_constructors() {
        let failure = WorkFailure::runtime(anyhow::anyhow!("boom"));
        assert_eq!(failure.kind, FailureKind::Runtime);

        let failure = WorkFailure::checked(anyhow::anyhow!("declined"));
        assert_eq!(failure.kind, FailureKind::Checked);

        let failure = WorkFailure::cancelled(anyhow::anyhow!("stopped"));
        assert_eq!(failure.kind, FailureKind::Cancelled);
    }
}
