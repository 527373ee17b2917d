//! Expression and predicate evaluation.
//!
//! A single interpreter walks the tagged variant trees against a definition
//! registry plus ledger snapshot. Evaluation is pure and deterministic; the
//! only state it reads is the [`EvalContext`].

use std::collections::BTreeMap;

use crate::defs::{AttributeKey, CurrencyKey, FeatureKey, Ruleset};
use crate::error::{CoreError, ErrorSeverity};
use crate::expr::{Comparison, Expr, Pred, Unmet};
use crate::ledger::Ledger;

/// Errors surfaced while evaluating an expression.
///
/// Ruleset-sourced expressions are reference-checked at construction, so
/// these only occur for ad-hoc expressions built by the caller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvalError {
    #[error("expression references undefined feature '{0}'")]
    UnknownFeature(FeatureKey),

    #[error("expression references undefined attribute '{0}'")]
    UnknownAttribute(AttributeKey),

    #[error("expression references undefined currency '{0}'")]
    UnknownCurrency(CurrencyKey),

    /// An attribute was read before the compiler resolved it. Cannot happen
    /// for a validated ruleset; indicates a bug in evaluation ordering.
    #[error("attribute '{0}' was read before it was resolved")]
    UnresolvedAttribute(AttributeKey),
}

impl CoreError for EvalError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            EvalError::UnknownFeature(_)
            | EvalError::UnknownAttribute(_)
            | EvalError::UnknownCurrency(_) => ErrorSeverity::Validation,
            EvalError::UnresolvedAttribute(_) => ErrorSeverity::Internal,
        }
    }
}

/// Read-only context for expression evaluation.
///
/// Rank overrides support hypothetical queries ("would the prerequisites hold
/// at the target rank?") without mutating the ledger.
pub struct EvalContext<'a> {
    ruleset: &'a Ruleset,
    ledger: &'a Ledger,
    resolved_attrs: Option<&'a BTreeMap<AttributeKey, i64>>,
    rank_overrides: BTreeMap<FeatureKey, i64>,
}

impl<'a> EvalContext<'a> {
    pub fn new(ruleset: &'a Ruleset, ledger: &'a Ledger) -> Self {
        Self {
            ruleset,
            ledger,
            resolved_attrs: None,
            rank_overrides: BTreeMap::new(),
        }
    }

    /// Supplies already-resolved attribute values.
    ///
    /// Used by the attribute compiler while walking the topological order;
    /// reading an attribute missing from the map is an internal error.
    pub fn with_resolved_attrs(mut self, attrs: &'a BTreeMap<AttributeKey, i64>) -> Self {
        self.resolved_attrs = Some(attrs);
        self
    }

    /// Overrides the observed rank of a feature for this evaluation.
    pub fn with_rank_override(mut self, feature: FeatureKey, rank: i64) -> Self {
        self.rank_overrides.insert(feature, rank);
        self
    }

    fn rank_of(&self, feature: &FeatureKey) -> i64 {
        if let Some(rank) = self.rank_overrides.get(feature) {
            return *rank;
        }
        self.ledger.rank_of(feature)
    }
}

/// Evaluates a value expression to a number.
pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<i64, EvalError> {
    match expr {
        Expr::Constant(value) => Ok(*value),

        Expr::Rank(feature) => {
            if ctx.ruleset.get_feature(feature).is_err() {
                return Err(EvalError::UnknownFeature(feature.clone()));
            }
            Ok(ctx.rank_of(feature))
        }

        Expr::Attribute(attribute) => {
            if let Some(resolved) = ctx.resolved_attrs {
                return resolved
                    .get(attribute)
                    .copied()
                    .ok_or_else(|| EvalError::UnresolvedAttribute(attribute.clone()));
            }
            crate::attrs::value_of(ctx.ruleset, ctx.ledger, attribute)
        }

        Expr::Balance(currency) => {
            if ctx.ruleset.get_currency(currency).is_err() {
                return Err(EvalError::UnknownCurrency(currency.clone()));
            }
            Ok(ctx.ledger.currency_total(currency))
        }

        Expr::Scaled { base, percent } => {
            let value = evaluate(base, ctx)?;
            Ok(value * percent / 100)
        }

        Expr::Sum(parts) => {
            let mut total = 0i64;
            for part in parts {
                total += evaluate(part, ctx)?;
            }
            Ok(total)
        }

        Expr::Min(parts) => parts
            .iter()
            .map(|part| evaluate(part, ctx))
            .try_fold(i64::MAX, |min, value| value.map(|v| min.min(v))),

        Expr::Max(parts) => parts
            .iter()
            .map(|part| evaluate(part, ctx))
            .try_fold(i64::MIN, |max, value| value.map(|v| max.max(v))),
    }
}

/// Checks a predicate, collecting every unmet check.
///
/// An empty result means the predicate holds. `Any` failures report the whole
/// alternative as one entry; `None` failures report each violating branch.
pub fn check_pred(pred: &Pred, ctx: &EvalContext<'_>) -> Result<Vec<Unmet>, EvalError> {
    let mut unmet = Vec::new();
    collect_unmet(pred, ctx, &mut unmet)?;
    Ok(unmet)
}

fn collect_unmet(
    pred: &Pred,
    ctx: &EvalContext<'_>,
    out: &mut Vec<Unmet>,
) -> Result<(), EvalError> {
    match pred {
        Pred::Always => Ok(()),

        Pred::All(parts) => {
            for part in parts {
                collect_unmet(part, ctx, out)?;
            }
            Ok(())
        }

        Pred::Any(parts) => {
            let mut satisfied = 0i64;
            for part in parts {
                if check_pred(part, ctx)?.is_empty() {
                    satisfied += 1;
                }
            }
            if satisfied == 0 {
                out.push(Unmet {
                    check: pred.to_string(),
                    actual: 0,
                    required: 1,
                });
            }
            Ok(())
        }

        Pred::None(parts) => {
            for part in parts {
                if check_pred(part, ctx)?.is_empty() {
                    out.push(Unmet {
                        check: format!("not({part})"),
                        actual: 1,
                        required: 0,
                    });
                }
            }
            Ok(())
        }

        Pred::Check(cmp) => {
            let Comparison { lhs, op, rhs } = cmp;
            let actual = evaluate(lhs, ctx)?;
            let required = evaluate(rhs, ctx)?;
            if !op.holds(actual, required) {
                out.push(Unmet {
                    check: cmp.to_string(),
                    actual,
                    required,
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{FeatureDefBuilder, RulesetBuilder};
    use crate::expr::CmpOp;

    fn test_ruleset() -> Ruleset {
        RulesetBuilder::new()
            .feature(FeatureDefBuilder::new("dodge", "Dodge").max_ranks(5).build())
            .feature(FeatureDefBuilder::new("sprint", "Sprint").max_ranks(3).build())
            .build()
            .unwrap()
    }

    #[test]
    fn constant_and_arithmetic() {
        let ruleset = test_ruleset();
        let ledger = Ledger::new();
        let ctx = EvalContext::new(&ruleset, &ledger);

        let expr = Expr::Sum(vec![
            Expr::Constant(3),
            Expr::Scaled {
                base: Box::new(Expr::Constant(10)),
                percent: 50,
            },
        ]);
        assert_eq!(evaluate(&expr, &ctx).unwrap(), 8);

        let expr = Expr::Min(vec![Expr::Constant(4), Expr::Constant(2)]);
        assert_eq!(evaluate(&expr, &ctx).unwrap(), 2);

        let expr = Expr::Max(vec![Expr::Constant(4), Expr::Constant(2)]);
        assert_eq!(evaluate(&expr, &ctx).unwrap(), 4);
    }

    #[test]
    fn rank_override_shadows_ledger() {
        let ruleset = test_ruleset();
        let ledger = Ledger::new();
        let ctx = EvalContext::new(&ruleset, &ledger).with_rank_override("dodge".into(), 4);

        assert_eq!(evaluate(&Expr::Rank("dodge".into()), &ctx).unwrap(), 4);
        assert_eq!(evaluate(&Expr::Rank("sprint".into()), &ctx).unwrap(), 0);
    }

    #[test]
    fn unknown_feature_is_rejected() {
        let ruleset = test_ruleset();
        let ledger = Ledger::new();
        let ctx = EvalContext::new(&ruleset, &ledger);

        let result = evaluate(&Expr::Rank("ghost".into()), &ctx);
        assert!(matches!(result, Err(EvalError::UnknownFeature(_))));
    }

    #[test]
    fn all_unmet_checks_are_collected() {
        let ruleset = test_ruleset();
        let ledger = Ledger::new();
        let ctx = EvalContext::new(&ruleset, &ledger);

        let pred = Pred::All(vec![
            Pred::requires_rank("dodge", 2),
            Pred::requires_rank("sprint", 1),
        ]);
        let unmet = check_pred(&pred, &ctx).unwrap();
        assert_eq!(unmet.len(), 2);
        assert_eq!(unmet[0].actual, 0);
        assert_eq!(unmet[0].required, 2);
    }

    #[test]
    fn any_reports_single_entry() {
        let ruleset = test_ruleset();
        let ledger = Ledger::new();
        let ctx = EvalContext::new(&ruleset, &ledger);

        let pred = Pred::Any(vec![
            Pred::requires_rank("dodge", 1),
            Pred::requires_rank("sprint", 1),
        ]);
        let unmet = check_pred(&pred, &ctx).unwrap();
        assert_eq!(unmet.len(), 1);
    }

    #[test]
    fn none_reports_each_violation() {
        let ruleset = test_ruleset();
        let ledger = Ledger::new();
        let ctx = EvalContext::new(&ruleset, &ledger).with_rank_override("dodge".into(), 1);

        let pred = Pred::None(vec![Pred::Check(Comparison {
            lhs: Expr::Rank("dodge".into()),
            op: CmpOp::AtLeast,
            rhs: Expr::Constant(1),
        })]);
        let unmet = check_pred(&pred, &ctx).unwrap();
        assert_eq!(unmet.len(), 1);
        assert!(unmet[0].check.starts_with("not("));
    }
}
