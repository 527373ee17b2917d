//! Currency partitions and balance bookkeeping.

use std::collections::BTreeMap;
use std::fmt;

use crate::defs::{CurrencyKey, FeatureKey};

/// Which pool of a currency a balance belongs to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionOwner {
    /// The character's single pool for a global currency.
    Global,
    /// The pool tied to one parent-feature instance of a local currency.
    Feature(FeatureKey),
}

/// Identifies one currency pool on a character.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionId {
    pub currency: CurrencyKey,
    pub owner: PartitionOwner,
}

impl PartitionId {
    pub fn global(currency: impl Into<CurrencyKey>) -> Self {
        Self {
            currency: currency.into(),
            owner: PartitionOwner::Global,
        }
    }

    pub fn local(currency: impl Into<CurrencyKey>, owner: impl Into<FeatureKey>) -> Self {
        Self {
            currency: currency.into(),
            owner: PartitionOwner::Feature(owner.into()),
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            PartitionOwner::Global => write!(f, "{}", self.currency),
            PartitionOwner::Feature(owner) => write!(f, "{}@{}", self.currency, owner),
        }
    }
}

/// A single debit against one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Debit {
    pub partition: PartitionId,
    pub amount: i64,
}

/// Balance table keyed by partition. Missing partitions read as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct BalanceTable(BTreeMap<PartitionId, i64>);

impl BalanceTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn balance(&self, partition: &PartitionId) -> i64 {
        self.0.get(partition).copied().unwrap_or(0)
    }

    /// Sum across every partition of a currency.
    pub(crate) fn currency_total(&self, currency: &CurrencyKey) -> i64 {
        self.0
            .iter()
            .filter(|(partition, _)| &partition.currency == currency)
            .map(|(_, amount)| amount)
            .sum()
    }

    pub(crate) fn credit(&mut self, partition: PartitionId, amount: i64) {
        self.adjust(partition, amount);
    }

    pub(crate) fn debit(&mut self, partition: PartitionId, amount: i64) {
        self.adjust(partition, -amount);
    }

    // Zero entries are pruned so ledgers that arrive at the same balances by
    // different histories compare equal.
    fn adjust(&mut self, partition: PartitionId, delta: i64) {
        let entry = self.0.entry(partition.clone()).or_insert(0);
        *entry += delta;
        if *entry == 0 {
            self.0.remove(&partition);
        }
    }

    /// Partitions currently below zero (used by retraction conflict checks).
    pub(crate) fn overdrawn(&self) -> Vec<(PartitionId, i64)> {
        self.0
            .iter()
            .filter(|(_, amount)| **amount < 0)
            .map(|(partition, amount)| (partition.clone(), *amount))
            .collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&PartitionId, i64)> {
        self.0.iter().map(|(partition, amount)| (partition, *amount))
    }
}
