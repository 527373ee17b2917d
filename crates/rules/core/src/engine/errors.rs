//! Error types for the purchase pipeline.
//!
//! Each gate has its own error enum; `PurchaseError` wraps them with the
//! phase that rejected the request. Every rejection is structured data, never
//! an unrecoverable fault, and no rejection leaves the ledger partially
//! mutated.

use crate::defs::{CurrencyKey, DefinitionError, FeatureKey, RankBound, SlotKey};
use crate::error::{CoreError, ErrorSeverity};
use crate::expr::{EvalError, Unmet};
use crate::ledger::{PartitionId, RecordSeq};

/// Identifies which gate of the purchase pipeline produced an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PurchasePhase {
    Eligibility,
    Cost,
    Commit,
}

impl PurchasePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchasePhase::Eligibility => "eligibility",
            PurchasePhase::Cost => "cost",
            PurchasePhase::Commit => "commit",
        }
    }
}

/// Errors surfaced by the eligibility gate.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EligibilityError {
    /// One or more prerequisite checks failed. Every unmet check is listed,
    /// not just the first, so a caller can present all blockers at once.
    #[error("prerequisites not met for '{feature}': {unmet:?}")]
    PrerequisiteNotMet {
        feature: FeatureKey,
        unmet: Vec<Unmet>,
    },

    /// The resulting rank would be negative or exceed the feature's maximum.
    #[error("rank {target} out of bounds for '{feature}' (max {max})")]
    RankOutOfBounds {
        feature: FeatureKey,
        target: i64,
        max: RankBound,
    },

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl CoreError for EligibilityError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            EligibilityError::PrerequisiteNotMet { .. }
            | EligibilityError::RankOutOfBounds { .. } => ErrorSeverity::Recoverable,
            EligibilityError::Definition(inner) => inner.severity(),
            EligibilityError::Eval(inner) => inner.severity(),
        }
    }
}

/// One under-funded partition in a cost rejection.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Shortfall {
    pub partition: PartitionId,
    pub required: i64,
    pub available: i64,
}

/// Errors surfaced by the currency resolver.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CostError {
    /// One or more partitions cannot cover their share. All shortfalls are
    /// reported, not just the first.
    #[error("insufficient funds for '{feature}': {shortfalls:?}")]
    InsufficientFunds {
        feature: FeatureKey,
        shortfalls: Vec<Shortfall>,
    },

    /// A local currency's partition could not be resolved: the request named
    /// no parent context and the feature has no parent.
    #[error("no partition for local currency '{currency}' purchasing '{feature}'")]
    NoPartition {
        feature: FeatureKey,
        currency: CurrencyKey,
    },

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl CoreError for CostError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            CostError::InsufficientFunds { .. } => ErrorSeverity::Recoverable,
            CostError::NoPartition { .. } => ErrorSeverity::Validation,
            CostError::Definition(inner) => inner.severity(),
        }
    }
}

/// Errors surfaced by the slot resolver.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SlotError {
    /// The chosen feature does not satisfy the slot's eligibility filter.
    #[error("'{feature}' is not eligible for slot '{slot}'")]
    NotEligible { slot: SlotKey, feature: FeatureKey },

    /// The chosen feature passed the filter but cannot be granted (unmet
    /// prerequisites, rank bounds).
    #[error("cannot grant '{feature}' from slot '{slot}': {source}")]
    GrantRejected {
        slot: SlotKey,
        feature: FeatureKey,
        source: EligibilityError,
    },

    /// The slot's fill capacity is already fully consumed.
    #[error("slot '{0}' has no remaining capacity")]
    SlotExhausted(SlotKey),

    /// The slot's collision policy is substitute and the chosen feature is
    /// already owned, but no alternate feature was supplied (or the supplied
    /// alternate is itself already owned).
    #[error("'{feature}' is already owned; slot '{slot}' requires a substitute")]
    SubstituteRequired { slot: SlotKey, feature: FeatureKey },

    /// No fill matching the given slot and feature exists to reverse.
    #[error("slot '{slot}' holds no fill for '{feature}'")]
    FillNotFound { slot: SlotKey, feature: FeatureKey },

    /// Reversing the fill required retracting its grant record and that
    /// retraction was rejected.
    #[error(transparent)]
    Retraction(#[from] RetractError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl CoreError for SlotError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            SlotError::NotEligible { .. }
            | SlotError::GrantRejected { .. }
            | SlotError::SlotExhausted(_)
            | SlotError::SubstituteRequired { .. } => ErrorSeverity::Recoverable,
            SlotError::FillNotFound { .. } => ErrorSeverity::Validation,
            SlotError::Retraction(inner) => inner.severity(),
            SlotError::Definition(inner) => inner.severity(),
            SlotError::Eval(inner) => inner.severity(),
        }
    }
}

/// One reason a retraction cannot proceed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Conflict {
    /// Another owned feature's prerequisite would stop holding.
    #[error("'{feature}' would lose a satisfied prerequisite: {unmet:?}")]
    PrerequisiteBroken {
        feature: FeatureKey,
        unmet: Vec<Unmet>,
    },

    /// Granted funds in this partition were already spent.
    #[error("partition '{partition}' would be overdrawn ({balance})")]
    PartitionOverdrawn {
        partition: PartitionId,
        balance: i64,
    },

    /// Granted slot capacity is already consumed by fills.
    #[error("slot '{slot}' would hold {fills} fills with capacity {capacity}")]
    SlotOverfilled {
        slot: SlotKey,
        fills: usize,
        capacity: u32,
    },

    /// A slot fill would reference a feature the character no longer owns.
    #[error("slot '{slot}' fill references '{feature}', which would no longer be owned")]
    FillInvalid { slot: SlotKey, feature: FeatureKey },
}

/// Errors surfaced while retracting a committed purchase.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RetractError {
    #[error("purchase record {0} not found")]
    RecordNotFound(RecordSeq),

    /// Retracting would violate constraints that currently hold. All
    /// conflicts are reported.
    #[error("retraction conflicts: {conflicts:?}")]
    RetractionConflict { conflicts: Vec<Conflict> },

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl CoreError for RetractError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            RetractError::RecordNotFound(_) => ErrorSeverity::Validation,
            RetractError::RetractionConflict { .. } => ErrorSeverity::Recoverable,
            RetractError::Definition(inner) => inner.severity(),
            RetractError::Eval(inner) => inner.severity(),
        }
    }
}

/// Umbrella error for the purchase pipeline, tagged with the failing gate.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PurchaseError {
    #[error("eligibility gate failed: {0}")]
    Eligibility(#[from] EligibilityError),

    #[error("cost gate failed: {0}")]
    Cost(#[from] CostError),

    #[error("commit failed: {0}")]
    Commit(#[from] DefinitionError),
}

impl PurchaseError {
    /// The gate that rejected the request.
    pub fn phase(&self) -> PurchasePhase {
        match self {
            PurchaseError::Eligibility(_) => PurchasePhase::Eligibility,
            PurchaseError::Cost(_) => PurchasePhase::Cost,
            PurchaseError::Commit(_) => PurchasePhase::Commit,
        }
    }
}

impl CoreError for PurchaseError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            PurchaseError::Eligibility(inner) => inner.severity(),
            PurchaseError::Cost(inner) => inner.severity(),
            PurchaseError::Commit(inner) => inner.severity(),
        }
    }
}
