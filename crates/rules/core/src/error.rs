//! Common error infrastructure for rules-core.
//!
//! This module provides shared types and traits used across all error types in
//! rules-core. Domain-specific errors (e.g., `EligibilityError`, `CostError`)
//! are defined in their respective modules alongside the operations they
//! validate.
//!
//! # Design Principles
//!
//! - **Type Safety**: Each gate has its own error type with specific variants
//! - **Complete Feedback**: Rejections enumerate every violated constraint
//!   where feasible, not just the first
//! - **Severity Classification**: Errors are categorized for recovery
//!   strategies at the service boundary

/// Severity level of an error, used for categorization and recovery strategies.
///
/// Errors are classified by their recoverability and expected handling:
/// - **Recoverable**: Rejections the caller can resolve and retry (spend less,
///   pick another feature, supply a substitute)
/// - **Validation**: Invalid input that should be rejected without retry
/// - **Internal**: Unexpected state inconsistencies that require investigation
/// - **Fatal**: Malformed ruleset, engine cannot start for that ruleset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Recoverable rejection - the caller can adjust the request and retry.
    ///
    /// Examples: prerequisites not met, insufficient funds, slot exhausted
    Recoverable,

    /// Validation error - invalid input, should not retry without changes.
    ///
    /// Examples: unknown feature key, record not found
    Validation,

    /// Internal error - unexpected state inconsistency.
    ///
    /// Examples: ledger index desync, unresolved attribute during compilation
    /// These indicate bugs and should be investigated.
    Internal,

    /// Fatal error - ruleset is malformed, engine cannot proceed.
    ///
    /// Examples: dependency cycle, reference to an undefined key
    Fatal,
}

impl ErrorSeverity {
    /// Returns a human-readable description of this severity level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Recoverable => "recoverable",
            ErrorSeverity::Validation => "validation",
            ErrorSeverity::Internal => "internal",
            ErrorSeverity::Fatal => "fatal",
        }
    }
}

/// Common behavior for all rules-core error types.
///
/// The service boundary uses the severity to decide whether to surface a
/// structured rejection to the player or to fail the request outright.
pub trait CoreError: std::error::Error {
    /// Returns the severity classification of this error.
    fn severity(&self) -> ErrorSeverity;

    /// Returns true if the caller can adjust the request and retry.
    fn is_recoverable(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Recoverable)
    }
}
