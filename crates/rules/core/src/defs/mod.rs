//! Immutable definition model for a loaded ruleset.
//!
//! The [`Ruleset`] is an arena-style registry: features, currencies,
//! attributes, and slots keyed by stable identifiers, with every
//! cross-reference stored as a key. It is built once by the ruleset loader
//! through [`RulesetBuilder`], validated (dangling references, dependency
//! cycles) at construction, and read-only thereafter, so it can be shared
//! across characters without synchronization.
mod attribute;
mod currency;
mod error;
mod feature;
mod keys;
mod matcher;
mod slot;

pub use attribute::AttributeDef;
pub use currency::{CurrencyDef, CurrencyScope};
pub use error::DefinitionError;
pub use feature::{CostTable, Effect, FeatureDef, FeatureDefBuilder, RankBound, RankCost};
pub use keys::{AttributeKey, CurrencyKey, FeatureKey, SlotKey};
pub use matcher::FeatureMatcher;
pub use slot::{CollisionPolicy, SlotDef};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::expr::Expr;

static EMPTY_ATTRS: BTreeSet<AttributeKey> = BTreeSet::new();

/// One attribute modifier carried by a feature, indexed for the compiler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifierRef {
    /// Feature whose ownership activates the modifier.
    pub feature: FeatureKey,
    /// Amount expression, evaluated while the feature is owned.
    pub amount: Expr,
}

/// Validated, immutable registry of definitions for one ruleset.
#[derive(Clone, Debug)]
pub struct Ruleset {
    features: BTreeMap<FeatureKey, FeatureDef>,
    currencies: BTreeMap<CurrencyKey, CurrencyDef>,
    attributes: BTreeMap<AttributeKey, AttributeDef>,
    slots: BTreeMap<SlotKey, SlotDef>,

    /// Attribute keys in dependency order (dependencies first).
    attribute_order: Vec<AttributeKey>,
    /// Direct dependents per attribute (reverse dependency edges).
    dependents: BTreeMap<AttributeKey, BTreeSet<AttributeKey>>,
    /// Modifiers contributing to each attribute.
    modifiers: BTreeMap<AttributeKey, Vec<ModifierRef>>,
    /// Attributes directly touched by each feature's modifiers.
    affected_by: BTreeMap<FeatureKey, BTreeSet<AttributeKey>>,
}

impl Ruleset {
    pub fn get_feature(&self, key: &FeatureKey) -> Result<&FeatureDef, DefinitionError> {
        self.features
            .get(key)
            .ok_or_else(|| DefinitionError::UnknownFeature(key.clone()))
    }

    pub fn get_currency(&self, key: &CurrencyKey) -> Result<&CurrencyDef, DefinitionError> {
        self.currencies
            .get(key)
            .ok_or_else(|| DefinitionError::UnknownCurrency(key.clone()))
    }

    pub fn get_attribute(&self, key: &AttributeKey) -> Result<&AttributeDef, DefinitionError> {
        self.attributes
            .get(key)
            .ok_or_else(|| DefinitionError::UnknownAttribute(key.clone()))
    }

    pub fn get_slot(&self, key: &SlotKey) -> Result<&SlotDef, DefinitionError> {
        self.slots
            .get(key)
            .ok_or_else(|| DefinitionError::UnknownSlot(key.clone()))
    }

    pub fn features(&self) -> impl Iterator<Item = &FeatureDef> {
        self.features.values()
    }

    pub fn slots(&self) -> impl Iterator<Item = &SlotDef> {
        self.slots.values()
    }

    /// Attribute keys in evaluation order (dependencies before dependents).
    pub fn attribute_order(&self) -> &[AttributeKey] {
        &self.attribute_order
    }

    /// Attributes whose value directly depends on the given attribute.
    pub fn dependents_of(
        &self,
        key: &AttributeKey,
    ) -> Result<&BTreeSet<AttributeKey>, DefinitionError> {
        self.dependents
            .get(key)
            .ok_or_else(|| DefinitionError::UnknownAttribute(key.clone()))
    }

    /// Modifiers contributing to the given attribute.
    pub fn modifiers_of(&self, key: &AttributeKey) -> &[ModifierRef] {
        self.modifiers.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Attributes directly modified by the given feature.
    pub fn attributes_affected_by(&self, key: &FeatureKey) -> &BTreeSet<AttributeKey> {
        self.affected_by.get(key).unwrap_or(&EMPTY_ATTRS)
    }
}

/// Collects definitions and validates them into a [`Ruleset`].
#[derive(Default)]
pub struct RulesetBuilder {
    features: Vec<FeatureDef>,
    currencies: Vec<CurrencyDef>,
    attributes: Vec<AttributeDef>,
    slots: Vec<SlotDef>,
}

impl RulesetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feature(mut self, def: FeatureDef) -> Self {
        self.features.push(def);
        self
    }

    pub fn currency(mut self, def: CurrencyDef) -> Self {
        self.currencies.push(def);
        self
    }

    pub fn attribute(mut self, def: AttributeDef) -> Self {
        self.attributes.push(def);
        self
    }

    pub fn slot(mut self, def: SlotDef) -> Self {
        self.slots.push(def);
        self
    }

    /// Validates all cross-references and dependency graphs and produces the
    /// immutable registry.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` if any definition key is duplicated, any
    /// expression references an undefined key, any by-rank cost table is
    /// empty, or the attribute dependency graph or feature grant graph
    /// contains a cycle.
    pub fn build(self) -> Result<Ruleset, DefinitionError> {
        let mut features = BTreeMap::new();
        for def in self.features {
            let key = def.key.clone();
            if features.insert(def.key.clone(), def).is_some() {
                return Err(DefinitionError::Duplicate(key.to_string()));
            }
        }
        let mut currencies = BTreeMap::new();
        for def in self.currencies {
            let key = def.key.clone();
            if currencies.insert(def.key.clone(), def).is_some() {
                return Err(DefinitionError::Duplicate(key.to_string()));
            }
        }
        let mut attributes = BTreeMap::new();
        for def in self.attributes {
            let key = def.key.clone();
            if attributes.insert(def.key.clone(), def).is_some() {
                return Err(DefinitionError::Duplicate(key.to_string()));
            }
        }
        let mut slots = BTreeMap::new();
        for def in self.slots {
            let key = def.key.clone();
            if slots.insert(def.key.clone(), def).is_some() {
                return Err(DefinitionError::Duplicate(key.to_string()));
            }
        }

        validate_references(&features, &currencies, &attributes, &slots)?;

        // Attribute dependency graph: formula references plus references made
        // by any modifier amount targeting the attribute.
        let mut deps: BTreeMap<AttributeKey, BTreeSet<AttributeKey>> = BTreeMap::new();
        for (key, def) in &attributes {
            let mut refs = BTreeSet::new();
            if let Some(formula) = &def.formula {
                formula.attribute_refs(&mut refs);
            }
            deps.insert(key.clone(), refs);
        }
        for def in features.values() {
            for effect in &def.effects {
                if let Effect::ModifyAttribute { attribute, amount } = effect {
                    let mut refs = BTreeSet::new();
                    amount.attribute_refs(&mut refs);
                    deps.entry(attribute.clone()).or_default().extend(refs);
                }
            }
        }
        let attribute_order = toposort(&deps)?;

        // Feature grant graph must be acyclic or committing a purchase would
        // cascade forever.
        let mut grant_edges: BTreeMap<FeatureKey, BTreeSet<FeatureKey>> = BTreeMap::new();
        for (key, def) in &features {
            let mut granted = BTreeSet::new();
            for effect in &def.effects {
                if let Effect::GrantFeature { feature, .. } = effect {
                    granted.insert(feature.clone());
                }
            }
            grant_edges.insert(key.clone(), granted);
        }
        toposort(&grant_edges)?;

        // Reverse edges and modifier indexes for the attribute compiler.
        let mut dependents: BTreeMap<AttributeKey, BTreeSet<AttributeKey>> = BTreeMap::new();
        for key in attributes.keys() {
            dependents.insert(key.clone(), BTreeSet::new());
        }
        for (key, refs) in &deps {
            for dep in refs {
                dependents.entry(dep.clone()).or_default().insert(key.clone());
            }
        }
        let mut modifiers: BTreeMap<AttributeKey, Vec<ModifierRef>> = BTreeMap::new();
        let mut affected_by: BTreeMap<FeatureKey, BTreeSet<AttributeKey>> = BTreeMap::new();
        for (key, def) in &features {
            for effect in &def.effects {
                if let Effect::ModifyAttribute { attribute, amount } = effect {
                    modifiers.entry(attribute.clone()).or_default().push(ModifierRef {
                        feature: key.clone(),
                        amount: amount.clone(),
                    });
                    affected_by
                        .entry(key.clone())
                        .or_default()
                        .insert(attribute.clone());
                }
            }
        }

        Ok(Ruleset {
            features,
            currencies,
            attributes,
            slots,
            attribute_order,
            dependents,
            modifiers,
            affected_by,
        })
    }
}

fn validate_references(
    features: &BTreeMap<FeatureKey, FeatureDef>,
    currencies: &BTreeMap<CurrencyKey, CurrencyDef>,
    attributes: &BTreeMap<AttributeKey, AttributeDef>,
    slots: &BTreeMap<SlotKey, SlotDef>,
) -> Result<(), DefinitionError> {
    let unknown = |referrer: &dyn fmt::Display, kind: &'static str, reference: &dyn fmt::Display| {
        DefinitionError::UnknownReference {
            referrer: referrer.to_string(),
            kind: kind.to_string(),
            reference: reference.to_string(),
        }
    };

    let check_expr = |referrer: &dyn fmt::Display, expr: &Expr| -> Result<(), DefinitionError> {
        let mut feature_refs = BTreeSet::new();
        let mut attribute_refs = BTreeSet::new();
        let mut currency_refs = BTreeSet::new();
        expr.feature_refs(&mut feature_refs);
        expr.attribute_refs(&mut attribute_refs);
        expr.currency_refs(&mut currency_refs);
        for key in &feature_refs {
            if !features.contains_key(key) {
                return Err(unknown(referrer, "feature", key));
            }
        }
        for key in &attribute_refs {
            if !attributes.contains_key(key) {
                return Err(unknown(referrer, "attribute", key));
            }
        }
        for key in &currency_refs {
            if !currencies.contains_key(key) {
                return Err(unknown(referrer, "currency", key));
            }
        }
        Ok(())
    };

    for (key, def) in features {
        if let Some(parent) = &def.parent {
            if !features.contains_key(parent) {
                return Err(unknown(key, "feature", parent));
            }
        }

        let mut feature_refs = BTreeSet::new();
        let mut attribute_refs = BTreeSet::new();
        let mut currency_refs = BTreeSet::new();
        def.requires.feature_refs(&mut feature_refs);
        def.requires.attribute_refs(&mut attribute_refs);
        def.requires.currency_refs(&mut currency_refs);
        for reference in &feature_refs {
            if !features.contains_key(reference) {
                return Err(unknown(key, "feature", reference));
            }
        }
        for reference in &attribute_refs {
            if !attributes.contains_key(reference) {
                return Err(unknown(key, "attribute", reference));
            }
        }
        for reference in &currency_refs {
            if !currencies.contains_key(reference) {
                return Err(unknown(key, "currency", reference));
            }
        }

        for cost in &def.costs {
            if !currencies.contains_key(cost.currency()) {
                return Err(unknown(key, "currency", cost.currency()));
            }
            if let RankCost::ByRank { table, .. } = cost {
                if table.is_empty() {
                    return Err(DefinitionError::EmptyCostTable(key.clone()));
                }
            }
        }

        for effect in &def.effects {
            match effect {
                Effect::ModifyAttribute { attribute, amount } => {
                    if !attributes.contains_key(attribute) {
                        return Err(unknown(key, "attribute", attribute));
                    }
                    check_expr(key, amount)?;
                }
                Effect::GrantFeature { feature, .. } => {
                    if !features.contains_key(feature) {
                        return Err(unknown(key, "feature", feature));
                    }
                }
                Effect::GrantSlot { slot, .. } => {
                    if !slots.contains_key(slot) {
                        return Err(unknown(key, "slot", slot));
                    }
                }
                Effect::GrantCurrency { currency, .. } => {
                    if !currencies.contains_key(currency) {
                        return Err(unknown(key, "currency", currency));
                    }
                }
            }
        }
    }

    for (key, def) in attributes {
        if let Some(formula) = &def.formula {
            check_expr(key, formula)?;
        }
    }

    for (key, def) in slots {
        if let Some(keys) = &def.filter.keys {
            for reference in keys {
                if !features.contains_key(reference) {
                    return Err(unknown(key, "feature", reference));
                }
            }
        }
        if let Some(parent) = &def.filter.parent {
            if !features.contains_key(parent) {
                return Err(unknown(key, "feature", parent));
            }
        }
    }

    Ok(())
}

/// Depth-first topological sort with cycle path extraction.
///
/// `deps[k]` lists the nodes `k` depends on; the returned order places
/// dependencies before dependents.
fn toposort<K>(deps: &BTreeMap<K, BTreeSet<K>>) -> Result<Vec<K>, DefinitionError>
where
    K: Ord + Clone + fmt::Display,
{
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    fn visit<K>(
        node: &K,
        deps: &BTreeMap<K, BTreeSet<K>>,
        state: &mut BTreeMap<K, u8>,
        stack: &mut Vec<K>,
        order: &mut Vec<K>,
    ) -> Result<(), DefinitionError>
    where
        K: Ord + Clone + fmt::Display,
    {
        match state.get(node).copied().unwrap_or(WHITE) {
            BLACK => return Ok(()),
            GRAY => {
                let start = stack.iter().position(|k| k == node).unwrap_or(0);
                let mut path: Vec<String> =
                    stack[start..].iter().map(|k| k.to_string()).collect();
                path.push(node.to_string());
                return Err(DefinitionError::DependencyCycle { path });
            }
            _ => {}
        }
        state.insert(node.clone(), GRAY);
        stack.push(node.clone());
        if let Some(children) = deps.get(node) {
            for child in children {
                visit(child, deps, state, stack, order)?;
            }
        }
        stack.pop();
        state.insert(node.clone(), BLACK);
        order.push(node.clone());
        Ok(())
    }

    let mut state = BTreeMap::new();
    let mut stack = Vec::new();
    let mut order = Vec::new();
    for node in deps.keys() {
        visit(node, deps, &mut state, &mut stack, &mut order)?;
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, Pred};

    #[test]
    fn lookup_unknown_keys() {
        let ruleset = RulesetBuilder::new().build().unwrap();
        assert!(matches!(
            ruleset.get_feature(&"ghost".into()),
            Err(DefinitionError::UnknownFeature(_))
        ));
        assert!(matches!(
            ruleset.get_slot(&"ghost".into()),
            Err(DefinitionError::UnknownSlot(_))
        ));
    }

    #[test]
    fn dangling_prerequisite_rejected() {
        let result = RulesetBuilder::new()
            .feature(
                FeatureDefBuilder::new("advanced", "Advanced")
                    .requires(Pred::requires_rank("missing", 1))
                    .build(),
            )
            .build();
        assert!(matches!(
            result,
            Err(DefinitionError::UnknownReference { .. })
        ));
    }

    #[test]
    fn dangling_cost_currency_rejected() {
        let result = RulesetBuilder::new()
            .feature(
                FeatureDefBuilder::new("skill", "Skill")
                    .cost("missing-points", 2)
                    .build(),
            )
            .build();
        assert!(matches!(
            result,
            Err(DefinitionError::UnknownReference { .. })
        ));
    }

    #[test]
    fn attribute_cycle_rejected() {
        let result = RulesetBuilder::new()
            .attribute(
                AttributeDef::new("a", "A", 0).with_formula(Expr::Attribute("b".into())),
            )
            .attribute(
                AttributeDef::new("b", "B", 0).with_formula(Expr::Attribute("a".into())),
            )
            .build();
        match result {
            Err(DefinitionError::DependencyCycle { path }) => {
                assert!(path.len() >= 2);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn grant_cycle_rejected() {
        let result = RulesetBuilder::new()
            .feature(
                FeatureDefBuilder::new("a", "A")
                    .effect(Effect::GrantFeature {
                        feature: "b".into(),
                        ranks: 1,
                    })
                    .build(),
            )
            .feature(
                FeatureDefBuilder::new("b", "B")
                    .effect(Effect::GrantFeature {
                        feature: "a".into(),
                        ranks: 1,
                    })
                    .build(),
            )
            .build();
        assert!(matches!(
            result,
            Err(DefinitionError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn attribute_order_is_topological() {
        let ruleset = RulesetBuilder::new()
            .attribute(AttributeDef::new("base", "Base", 10))
            .attribute(
                AttributeDef::new("derived", "Derived", 0)
                    .with_formula(Expr::Scaled {
                        base: Box::new(Expr::Attribute("base".into())),
                        percent: 50,
                    }),
            )
            .build()
            .unwrap();

        let order = ruleset.attribute_order();
        let base_pos = order.iter().position(|k| k.as_str() == "base").unwrap();
        let derived_pos = order.iter().position(|k| k.as_str() == "derived").unwrap();
        assert!(base_pos < derived_pos);

        let dependents = ruleset.dependents_of(&"base".into()).unwrap();
        assert!(dependents.contains(&"derived".into()));
    }

    #[test]
    fn duplicate_feature_rejected() {
        let result = RulesetBuilder::new()
            .feature(FeatureDefBuilder::new("dup", "Dup").build())
            .feature(FeatureDefBuilder::new("dup", "Dup Again").build())
            .build();
        assert!(matches!(result, Err(DefinitionError::Duplicate(_))));
    }
}
