//! Closed expression representation for ruleset-defined predicates and values.
//!
//! Prerequisite, cost, and effect expressions vary per ruleset, so they are
//! represented as a small tagged variant tree evaluated by a single
//! interpreter rather than arbitrary executable code. This keeps the
//! definition model pure data: shareable, cacheable, serializable.
//!
//! ## Examples
//!
//! ```ignore
//! // "rank of basic-archery, at least 2"
//! Pred::requires_rank("basic-archery", 2)
//!
//! // "half of agility, plus 1 per rank of dodge"
//! Expr::Sum(vec![
//!     Expr::Scaled { base: Box::new(Expr::Attribute("agility".into())), percent: 50 },
//!     Expr::Rank("dodge".into()),
//! ])
//! ```

pub mod evaluate;

pub use evaluate::{EvalContext, EvalError, check_pred, evaluate};

use std::collections::BTreeSet;
use std::fmt;

use crate::defs::{AttributeKey, CurrencyKey, FeatureKey};

// ============================================================================
// Value Expressions
// ============================================================================

/// Expression tree producing a numeric value from ledger state.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Expr {
    /// Fixed constant value.
    Constant(i64),

    /// Current rank of a feature (0 when not owned).
    Rank(FeatureKey),

    /// Resolved value of an attribute.
    Attribute(AttributeKey),

    /// Balance of a currency. For a local currency this is the character's
    /// total across all partitions; individual partitions are never addressed
    /// from expressions.
    Balance(CurrencyKey),

    /// Percentage of a sub-expression (integer math, truncating).
    Scaled { base: Box<Expr>, percent: i64 },

    /// Sum of multiple expressions.
    Sum(Vec<Expr>),

    /// Minimum of multiple expressions.
    Min(Vec<Expr>),

    /// Maximum of multiple expressions.
    Max(Vec<Expr>),
}

impl Expr {
    /// Collects every feature key referenced by this expression.
    pub fn feature_refs(&self, out: &mut BTreeSet<FeatureKey>) {
        match self {
            Expr::Rank(key) => {
                out.insert(key.clone());
            }
            Expr::Scaled { base, .. } => base.feature_refs(out),
            Expr::Sum(parts) | Expr::Min(parts) | Expr::Max(parts) => {
                for part in parts {
                    part.feature_refs(out);
                }
            }
            Expr::Constant(_) | Expr::Attribute(_) | Expr::Balance(_) => {}
        }
    }

    /// Collects every attribute key referenced by this expression.
    pub fn attribute_refs(&self, out: &mut BTreeSet<AttributeKey>) {
        match self {
            Expr::Attribute(key) => {
                out.insert(key.clone());
            }
            Expr::Scaled { base, .. } => base.attribute_refs(out),
            Expr::Sum(parts) | Expr::Min(parts) | Expr::Max(parts) => {
                for part in parts {
                    part.attribute_refs(out);
                }
            }
            Expr::Constant(_) | Expr::Rank(_) | Expr::Balance(_) => {}
        }
    }

    /// Collects every currency key referenced by this expression.
    pub fn currency_refs(&self, out: &mut BTreeSet<CurrencyKey>) {
        match self {
            Expr::Balance(key) => {
                out.insert(key.clone());
            }
            Expr::Scaled { base, .. } => base.currency_refs(out),
            Expr::Sum(parts) | Expr::Min(parts) | Expr::Max(parts) => {
                for part in parts {
                    part.currency_refs(out);
                }
            }
            Expr::Constant(_) | Expr::Rank(_) | Expr::Attribute(_) => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(value) => write!(f, "{value}"),
            Expr::Rank(key) => write!(f, "rank({key})"),
            Expr::Attribute(key) => write!(f, "attr({key})"),
            Expr::Balance(key) => write!(f, "balance({key})"),
            Expr::Scaled { base, percent } => write!(f, "({base} * {percent}%)"),
            Expr::Sum(parts) => write_list(f, "sum", parts),
            Expr::Min(parts) => write_list(f, "min", parts),
            Expr::Max(parts) => write_list(f, "max", parts),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, name: &str, parts: &[Expr]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{part}")?;
    }
    write!(f, ")")
}

// ============================================================================
// Predicates
// ============================================================================

/// Comparison operator for predicate checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CmpOp {
    AtLeast,
    Greater,
    AtMost,
    Less,
    Equal,
    NotEqual,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::AtLeast => ">=",
            CmpOp::Greater => ">",
            CmpOp::AtMost => "<=",
            CmpOp::Less => "<",
            CmpOp::Equal => "==",
            CmpOp::NotEqual => "!=",
        }
    }

    /// Applies the operator to two resolved values.
    pub fn holds(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpOp::AtLeast => lhs >= rhs,
            CmpOp::Greater => lhs > rhs,
            CmpOp::AtMost => lhs <= rhs,
            CmpOp::Less => lhs < rhs,
            CmpOp::Equal => lhs == rhs,
            CmpOp::NotEqual => lhs != rhs,
        }
    }
}

/// A single comparison between two value expressions.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Comparison {
    pub lhs: Expr,
    pub op: CmpOp,
    pub rhs: Expr,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op.as_str(), self.rhs)
    }
}

/// Boolean predicate tree over ledger state.
///
/// Evaluation collects every unmet check rather than stopping at the first,
/// so a caller can present all blockers in one round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Pred {
    /// Trivially satisfied.
    Always,

    /// Every sub-predicate must hold.
    All(Vec<Pred>),

    /// At least one sub-predicate must hold.
    Any(Vec<Pred>),

    /// No sub-predicate may hold.
    None(Vec<Pred>),

    /// A single comparison must hold.
    Check(Comparison),
}

impl Pred {
    /// Convenience constructor: "rank of `feature` is at least `value`".
    pub fn requires_rank(feature: impl Into<FeatureKey>, value: i64) -> Self {
        Pred::Check(Comparison {
            lhs: Expr::Rank(feature.into()),
            op: CmpOp::AtLeast,
            rhs: Expr::Constant(value),
        })
    }

    /// Convenience constructor: "value of `attribute` is at least `value`".
    pub fn requires_attribute(attribute: impl Into<AttributeKey>, value: i64) -> Self {
        Pred::Check(Comparison {
            lhs: Expr::Attribute(attribute.into()),
            op: CmpOp::AtLeast,
            rhs: Expr::Constant(value),
        })
    }

    /// Collects every feature key referenced by this predicate.
    pub fn feature_refs(&self, out: &mut BTreeSet<FeatureKey>) {
        match self {
            Pred::Always => {}
            Pred::All(parts) | Pred::Any(parts) | Pred::None(parts) => {
                for part in parts {
                    part.feature_refs(out);
                }
            }
            Pred::Check(cmp) => {
                cmp.lhs.feature_refs(out);
                cmp.rhs.feature_refs(out);
            }
        }
    }

    /// Collects every attribute key referenced by this predicate.
    pub fn attribute_refs(&self, out: &mut BTreeSet<AttributeKey>) {
        match self {
            Pred::Always => {}
            Pred::All(parts) | Pred::Any(parts) | Pred::None(parts) => {
                for part in parts {
                    part.attribute_refs(out);
                }
            }
            Pred::Check(cmp) => {
                cmp.lhs.attribute_refs(out);
                cmp.rhs.attribute_refs(out);
            }
        }
    }

    /// Collects every currency key referenced by this predicate.
    pub fn currency_refs(&self, out: &mut BTreeSet<CurrencyKey>) {
        match self {
            Pred::Always => {}
            Pred::All(parts) | Pred::Any(parts) | Pred::None(parts) => {
                for part in parts {
                    part.currency_refs(out);
                }
            }
            Pred::Check(cmp) => {
                cmp.lhs.currency_refs(out);
                cmp.rhs.currency_refs(out);
            }
        }
    }
}

impl fmt::Display for Pred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pred::Always => write!(f, "always"),
            Pred::All(parts) => write_pred_list(f, "all", parts),
            Pred::Any(parts) => write_pred_list(f, "any", parts),
            Pred::None(parts) => write_pred_list(f, "none", parts),
            Pred::Check(cmp) => write!(f, "{cmp}"),
        }
    }
}

fn write_pred_list(f: &mut fmt::Formatter<'_>, name: &str, parts: &[Pred]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, "; ")?;
        }
        write!(f, "{part}")?;
    }
    write!(f, ")")
}

/// A single failed predicate check, with the values observed at evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Unmet {
    /// Rendered form of the failed check, e.g. `rank(basic-archery) >= 2`.
    pub check: String,
    /// Value the left-hand side resolved to.
    pub actual: i64,
    /// Value the right-hand side resolved to.
    pub required: i64,
}

impl fmt::Display for Unmet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} vs {}]", self.check, self.actual, self.required)
    }
}
