//! Lazy attribute cache.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::defs::{AttributeKey, FeatureKey, Ruleset};
use crate::expr::EvalError;
use crate::ledger::Ledger;

use super::compile;

/// Caches resolved attribute values between ledger mutations.
///
/// The cache is keyed to the ledger's revision counter: a read against a
/// different revision recomputes everything, while a caller that knows which
/// features changed can call [`AttributeCache::recompute_affected`] to
/// refresh only the transitive dependents. Either way the observable values
/// match eager compilation; this is a caching strategy, not a contract
/// difference.
#[derive(Clone, Debug, Default)]
pub struct AttributeCache {
    values: BTreeMap<AttributeKey, i64>,
    revision: Option<u64>,
}

impl AttributeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads one attribute, recomputing the cache if it is stale.
    pub fn value_of(
        &mut self,
        ruleset: &Ruleset,
        ledger: &Ledger,
        key: &AttributeKey,
    ) -> Result<i64, EvalError> {
        if self.revision != Some(ledger.revision()) {
            self.values = compile::compile_all(ruleset, ledger)?;
            self.revision = Some(ledger.revision());
        }
        self.values
            .get(key)
            .copied()
            .ok_or_else(|| EvalError::UnknownAttribute(key.clone()))
    }

    /// Recomputes only the attributes transitively affected by the given
    /// feature changes and returns the affected set.
    ///
    /// Falls back to full recompilation when the cache has never been primed.
    pub fn recompute_affected(
        &mut self,
        ruleset: &Ruleset,
        ledger: &Ledger,
        changed_features: &[FeatureKey],
    ) -> Result<BTreeSet<AttributeKey>, EvalError> {
        if self.revision.is_none() {
            self.values = compile::compile_all(ruleset, ledger)?;
            self.revision = Some(ledger.revision());
            return Ok(self.values.keys().cloned().collect());
        }

        let affected = affected_closure(ruleset, changed_features);

        // Walk the stored topological order, refreshing only affected keys;
        // untouched values are reused as already-resolved inputs.
        for key in ruleset.attribute_order() {
            if affected.contains(key) {
                let value = compile::resolve(ruleset, ledger, key, &self.values)?;
                self.values.insert(key.clone(), value);
            }
        }
        self.revision = Some(ledger.revision());
        Ok(affected)
    }
}

/// Attributes directly touched by the changed features plus every transitive
/// dependent.
fn affected_closure(ruleset: &Ruleset, changed_features: &[FeatureKey]) -> BTreeSet<AttributeKey> {
    let mut affected: BTreeSet<AttributeKey> = BTreeSet::new();
    let mut queue: VecDeque<AttributeKey> = VecDeque::new();

    for feature in changed_features {
        for attribute in ruleset.attributes_affected_by(feature) {
            if affected.insert(attribute.clone()) {
                queue.push_back(attribute.clone());
            }
        }
    }

    while let Some(attribute) = queue.pop_front() {
        if let Ok(dependents) = ruleset.dependents_of(&attribute) {
            for dependent in dependents {
                if affected.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
    }

    affected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{AttributeDef, Effect, FeatureDefBuilder, RulesetBuilder};
    use crate::expr::Expr;
    use crate::ledger::PurchaseSource;

    fn test_ruleset() -> Ruleset {
        RulesetBuilder::new()
            .attribute(AttributeDef::new("agility", "Agility", 8))
            .attribute(AttributeDef::new("luck", "Luck", 1))
            .attribute(
                AttributeDef::new("dodge-chance", "Dodge Chance", 0).with_formula(Expr::Scaled {
                    base: Box::new(Expr::Attribute("agility".into())),
                    percent: 200,
                }),
            )
            .feature(
                FeatureDefBuilder::new("acrobat", "Acrobat")
                    .max_ranks(2)
                    .effect(Effect::ModifyAttribute {
                        attribute: "agility".into(),
                        amount: Expr::Rank("acrobat".into()),
                    })
                    .build(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn lazy_matches_eager() {
        let ruleset = test_ruleset();
        let mut ledger = Ledger::new();
        let mut cache = AttributeCache::new();

        assert_eq!(
            cache.value_of(&ruleset, &ledger, &"dodge-chance".into()).unwrap(),
            16
        );

        ledger.push_record("acrobat".into(), 2, PurchaseSource::Direct, vec![]);
        let affected = cache
            .recompute_affected(&ruleset, &ledger, &["acrobat".into()])
            .unwrap();

        assert!(affected.contains(&"agility".into()));
        assert!(affected.contains(&"dodge-chance".into()));
        assert!(!affected.contains(&"luck".into()));

        for key in ruleset.attribute_order() {
            assert_eq!(
                cache.value_of(&ruleset, &ledger, key).unwrap(),
                compile::value_of(&ruleset, &ledger, key).unwrap(),
            );
        }
    }

    #[test]
    fn stale_cache_recomputes_on_read() {
        let ruleset = test_ruleset();
        let mut ledger = Ledger::new();
        let mut cache = AttributeCache::new();

        assert_eq!(cache.value_of(&ruleset, &ledger, &"agility".into()).unwrap(), 8);

        // Mutate without notifying the cache; the revision check catches it.
        ledger.push_record("acrobat".into(), 1, PurchaseSource::Direct, vec![]);
        assert_eq!(cache.value_of(&ruleset, &ledger, &"agility".into()).unwrap(), 9);
    }
}
