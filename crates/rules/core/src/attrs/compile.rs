//! Eager attribute compilation.

use std::collections::BTreeMap;

use crate::defs::{AttributeKey, Ruleset};
use crate::expr::{EvalContext, EvalError, evaluate};
use crate::ledger::Ledger;

/// Resolves every attribute in dependency order.
///
/// Dependencies are evaluated before dependents, so each formula and modifier
/// sees only already-resolved attribute values.
pub fn compile_all(
    ruleset: &Ruleset,
    ledger: &Ledger,
) -> Result<BTreeMap<AttributeKey, i64>, EvalError> {
    let mut values: BTreeMap<AttributeKey, i64> = BTreeMap::new();
    for key in ruleset.attribute_order() {
        let value = resolve(ruleset, ledger, key, &values)?;
        values.insert(key.clone(), value);
    }
    Ok(values)
}

/// Resolves a single attribute (recomputing its dependency closure).
pub fn value_of(
    ruleset: &Ruleset,
    ledger: &Ledger,
    key: &AttributeKey,
) -> Result<i64, EvalError> {
    let values = compile_all(ruleset, ledger)?;
    values
        .get(key)
        .copied()
        .ok_or_else(|| EvalError::UnknownAttribute(key.clone()))
}

/// Computes one attribute against already-resolved predecessors.
pub(crate) fn resolve(
    ruleset: &Ruleset,
    ledger: &Ledger,
    key: &AttributeKey,
    resolved: &BTreeMap<AttributeKey, i64>,
) -> Result<i64, EvalError> {
    let def = ruleset
        .get_attribute(key)
        .map_err(|_| EvalError::UnknownAttribute(key.clone()))?;

    let ctx = EvalContext::new(ruleset, ledger).with_resolved_attrs(resolved);

    let mut value = match &def.formula {
        Some(formula) => evaluate(formula, &ctx)?,
        None => def.default,
    };

    for modifier in ruleset.modifiers_of(key) {
        if ledger.rank_of(&modifier.feature) > 0 {
            value += evaluate(&modifier.amount, &ctx)?;
        }
    }

    Ok(value)
}
