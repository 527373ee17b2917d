//! Definition model errors.

use crate::defs::{AttributeKey, CurrencyKey, FeatureKey, SlotKey};
use crate::error::{CoreError, ErrorSeverity};

/// Errors raised while constructing or querying the definition model.
///
/// Construction-time errors (cycles, dangling references, duplicates) are
/// fatal: the ruleset cannot be loaded. Lookup errors are validation errors
/// surfaced when a caller passes an unknown key.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DefinitionError {
    #[error("feature '{0}' is not defined")]
    UnknownFeature(FeatureKey),

    #[error("currency '{0}' is not defined")]
    UnknownCurrency(CurrencyKey),

    #[error("attribute '{0}' is not defined")]
    UnknownAttribute(AttributeKey),

    #[error("slot '{0}' is not defined")]
    UnknownSlot(SlotKey),

    /// A definition references a key that no definition carries.
    #[error("'{referrer}' references undefined {kind} '{reference}'")]
    UnknownReference {
        referrer: String,
        kind: String,
        reference: String,
    },

    /// The attribute dependency graph or the feature grant graph has a cycle.
    #[error("dependency cycle: {path:?}")]
    DependencyCycle { path: Vec<String> },

    #[error("duplicate definition for '{0}'")]
    Duplicate(String),

    /// A by-rank cost table with no entries charges nothing; almost certainly
    /// an authoring mistake.
    #[error("feature '{0}' has an empty cost table")]
    EmptyCostTable(FeatureKey),
}

impl CoreError for DefinitionError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            DefinitionError::UnknownFeature(_)
            | DefinitionError::UnknownCurrency(_)
            | DefinitionError::UnknownAttribute(_)
            | DefinitionError::UnknownSlot(_) => ErrorSeverity::Validation,

            DefinitionError::UnknownReference { .. }
            | DefinitionError::DependencyCycle { .. }
            | DefinitionError::Duplicate(_)
            | DefinitionError::EmptyCostTable(_) => ErrorSeverity::Fatal,
        }
    }
}
