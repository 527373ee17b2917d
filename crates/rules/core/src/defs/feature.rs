//! Feature definitions: the purchasable capabilities of a ruleset.

use std::collections::BTreeSet;
use std::fmt;

use crate::defs::{AttributeKey, CurrencyKey, FeatureKey, SlotKey};
use crate::expr::{Expr, Pred};

/// Upper bound on a feature's rank dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RankBound {
    /// At most this many ranks.
    Bounded(u32),
    /// No upper bound.
    Unbounded,
}

impl RankBound {
    /// Returns true if the given total rank fits within the bound.
    pub fn allows(&self, rank: i64) -> bool {
        match self {
            RankBound::Bounded(max) => rank <= i64::from(*max),
            RankBound::Unbounded => true,
        }
    }
}

impl fmt::Display for RankBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankBound::Bounded(max) => write!(f, "{max}"),
            RankBound::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Per-rank cost lookup table for non-linear cost curves.
///
/// The cost of rank `r` is the value stored at the greatest key that does not
/// exceed `r`, so `{1: 2, 3: 4}` charges 2 per rank for ranks 1-2 and 4 per
/// rank from rank 3 on.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostTable(std::collections::BTreeMap<u32, i64>);

impl CostTable {
    pub fn new(entries: impl IntoIterator<Item = (u32, i64)>) -> Self {
        Self(entries.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cost of a single rank. Ranks below the lowest key cost nothing.
    pub fn per_rank(&self, rank: u32) -> i64 {
        self.0
            .range(..=rank)
            .next_back()
            .map(|(_, cost)| *cost)
            .unwrap_or(0)
    }
}

/// Cost of a feature in one currency.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RankCost {
    /// Same cost for every rank.
    Flat { currency: CurrencyKey, amount: i64 },

    /// Rank-dependent cost, e.g. higher ranks cost more per point.
    ByRank { currency: CurrencyKey, table: CostTable },
}

impl RankCost {
    pub fn currency(&self) -> &CurrencyKey {
        match self {
            RankCost::Flat { currency, .. } | RankCost::ByRank { currency, .. } => currency,
        }
    }

    /// Cost of a single rank in this currency.
    pub fn per_rank(&self, rank: u32) -> i64 {
        match self {
            RankCost::Flat { amount, .. } => *amount,
            RankCost::ByRank { table, .. } => table.per_rank(rank),
        }
    }
}

/// Effect granted by owning a feature.
///
/// `ModifyAttribute` is continuous: it contributes to the attribute for as
/// long as the feature is owned, and the amount expression may reference the
/// feature's own rank to scale. The `Grant*` effects apply once when the
/// feature first becomes owned and are reverted when its rank returns to
/// zero.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Effect {
    /// Adds the evaluated amount to an attribute while the feature is owned.
    ModifyAttribute { attribute: AttributeKey, amount: Expr },

    /// Grants ranks of another feature (provenance tracked, no cost).
    GrantFeature { feature: FeatureKey, ranks: u32 },

    /// Adds fill capacity for a slot on top of its base cardinality.
    GrantSlot { slot: SlotKey, count: u32 },

    /// Funds a currency pool. For a local currency, the funded partition is
    /// the one owned by the granting feature instance.
    GrantCurrency { currency: CurrencyKey, amount: i64 },
}

/// Immutable description of a purchasable feature.
///
/// Built once at ruleset load time via [`FeatureDefBuilder`]; cross-references
/// are stored as keys and validated when the [`Ruleset`](crate::defs::Ruleset)
/// is constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureDef {
    pub key: FeatureKey,
    pub name: String,
    /// Feature this one is logically nested under. A local currency spent on
    /// this feature defaults its partition to this parent.
    pub parent: Option<FeatureKey>,
    pub tags: BTreeSet<String>,
    pub max_ranks: RankBound,
    /// Prerequisites, evaluated at the target rank. Interpreted as always-on:
    /// retraction elsewhere may not break them.
    pub requires: Pred,
    pub costs: Vec<RankCost>,
    pub effects: Vec<Effect>,
}

/// Builder for feature definitions.
pub struct FeatureDefBuilder {
    def: FeatureDef,
}

impl FeatureDefBuilder {
    pub fn new(key: impl Into<FeatureKey>, name: impl Into<String>) -> Self {
        Self {
            def: FeatureDef {
                key: key.into(),
                name: name.into(),
                parent: None,
                tags: BTreeSet::new(),
                max_ranks: RankBound::Bounded(1),
                requires: Pred::Always,
                costs: Vec::new(),
                effects: Vec::new(),
            },
        }
    }

    pub fn parent(mut self, parent: impl Into<FeatureKey>) -> Self {
        self.def.parent = Some(parent.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.def.tags.insert(tag.into());
        self
    }

    pub fn max_ranks(mut self, max: u32) -> Self {
        self.def.max_ranks = RankBound::Bounded(max);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.def.max_ranks = RankBound::Unbounded;
        self
    }

    pub fn requires(mut self, requires: Pred) -> Self {
        self.def.requires = requires;
        self
    }

    /// Flat cost per rank in the given currency.
    pub fn cost(mut self, currency: impl Into<CurrencyKey>, amount: i64) -> Self {
        self.def.costs.push(RankCost::Flat {
            currency: currency.into(),
            amount,
        });
        self
    }

    /// Rank-dependent cost in the given currency.
    pub fn cost_by_rank(
        mut self,
        currency: impl Into<CurrencyKey>,
        entries: impl IntoIterator<Item = (u32, i64)>,
    ) -> Self {
        self.def.costs.push(RankCost::ByRank {
            currency: currency.into(),
            table: CostTable::new(entries),
        });
        self
    }

    pub fn effect(mut self, effect: Effect) -> Self {
        self.def.effects.push(effect);
        self
    }

    pub fn build(self) -> FeatureDef {
        self.def
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_table_steps_up() {
        let table = CostTable::new([(1, 2), (3, 4)]);
        assert_eq!(table.per_rank(1), 2);
        assert_eq!(table.per_rank(2), 2);
        assert_eq!(table.per_rank(3), 4);
        assert_eq!(table.per_rank(7), 4);
    }

    #[test]
    fn cost_table_below_lowest_key_is_free() {
        let table = CostTable::new([(3, 4)]);
        assert_eq!(table.per_rank(1), 0);
        assert_eq!(table.per_rank(3), 4);
    }

    #[test]
    fn rank_bound_allows() {
        assert!(RankBound::Bounded(3).allows(3));
        assert!(!RankBound::Bounded(3).allows(4));
        assert!(RankBound::Unbounded.allows(1_000_000));
    }
}
