//! Attribute definitions: derived values computed from ledger state.

use crate::defs::AttributeKey;
use crate::expr::Expr;

/// Immutable description of a derived attribute.
///
/// The resolved value is the formula result (or `default` when no formula is
/// set) plus the sum of every `ModifyAttribute` effect attached to an owned
/// feature. Dependencies on other attributes are extracted from the formula
/// and modifier expressions and checked acyclic at ruleset construction.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeDef {
    pub key: AttributeKey,
    pub name: String,
    /// Base value when no formula is set.
    pub default: i64,
    /// Optional base formula; replaces `default` when present.
    pub formula: Option<Expr>,
}

impl AttributeDef {
    pub fn new(key: impl Into<AttributeKey>, name: impl Into<String>, default: i64) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            default,
            formula: None,
        }
    }

    pub fn with_formula(mut self, formula: Expr) -> Self {
        self.formula = Some(formula);
        self
    }
}
