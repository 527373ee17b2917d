//! Per-character mutable purchase state.
//!
//! The [`Ledger`] owns the ordered purchase records, currency balances, slot
//! fills, and activation entries for exactly one character. Fields are
//! private and mutation goes through `pub(crate)` methods so that all state
//! changes flow through the engine's validate-then-commit pipeline; the only
//! public mutator is [`Ledger::award`], the funding entry point for the
//! boundary (starting pools, event awards).
mod balances;
pub mod records;
#[cfg(feature = "serde")]
pub mod snapshot;

pub use balances::{Debit, PartitionId, PartitionOwner};
pub use records::{
    Activation, FillOutcome, PurchaseRecord, PurchaseSource, RecordSeq, RefundEntry, SlotFill,
};

use std::collections::BTreeMap;

use balances::BalanceTable;

use crate::defs::{CurrencyKey, FeatureKey, SlotKey};

/// Mutable per-character record of purchases, balances, and slot fills.
///
/// Equality ignores the revision counter: two ledgers are equal when their
/// logical state is identical, regardless of how many mutations produced it.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    records: Vec<PurchaseRecord>,
    balances: BalanceTable,
    fills: Vec<SlotFill>,
    /// One-shot grant effects currently applied, per owned feature.
    activations: BTreeMap<FeatureKey, Activation>,
    /// Extra slot capacity from activations, per slot. Derived bookkeeping.
    granted_capacity: BTreeMap<SlotKey, u32>,
    /// Derived index: current total rank per feature. Zero entries pruned.
    ranks: BTreeMap<FeatureKey, i64>,
    /// Bumped on every mutation; cache invalidation bookkeeping, not logical
    /// state.
    revision: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    /// Current total rank of a feature across all sources (0 when unowned).
    pub fn rank_of(&self, feature: &FeatureKey) -> i64 {
        self.ranks.get(feature).copied().unwrap_or(0)
    }

    /// Rank held through any source other than the given slot.
    pub fn rank_outside_slot(&self, feature: &FeatureKey, slot: &SlotKey) -> i64 {
        self.records
            .iter()
            .filter(|record| &record.feature == feature)
            .filter(|record| record.source != PurchaseSource::Slot(slot.clone()))
            .map(|record| i64::from(record.rank_delta))
            .sum()
    }

    /// Balance of one partition (0 when the partition has never been funded).
    pub fn balance(&self, partition: &PartitionId) -> i64 {
        self.balances.balance(partition)
    }

    /// Total balance of a currency across all of its partitions.
    pub fn currency_total(&self, currency: &CurrencyKey) -> i64 {
        self.balances.currency_total(currency)
    }

    /// All funded partitions and their balances.
    pub fn balances(&self) -> impl Iterator<Item = (&PartitionId, i64)> {
        self.balances.iter()
    }

    pub fn records(&self) -> &[PurchaseRecord] {
        &self.records
    }

    pub fn record(&self, seq: RecordSeq) -> Option<&PurchaseRecord> {
        self.records.iter().find(|record| record.seq == seq)
    }

    pub fn fills(&self) -> &[SlotFill] {
        &self.fills
    }

    pub fn fill_count(&self, slot: &SlotKey) -> usize {
        self.fills.iter().filter(|fill| &fill.slot == slot).count()
    }

    /// Extra fill capacity granted for a slot on top of its base cardinality.
    pub fn granted_capacity(&self, slot: &SlotKey) -> u32 {
        self.granted_capacity.get(slot).copied().unwrap_or(0)
    }

    /// Features currently owned (rank > 0) with their ranks.
    pub fn owned_features(&self) -> impl Iterator<Item = (&FeatureKey, i64)> {
        self.ranks.iter().map(|(key, rank)| (key, *rank))
    }

    /// True if the feature's one-shot grant effects are currently applied.
    pub fn is_active(&self, feature: &FeatureKey) -> bool {
        self.activations.contains_key(feature)
    }

    /// Mutation counter for cache invalidation. Not part of logical state.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ------------------------------------------------------------------
    // Boundary funding
    // ------------------------------------------------------------------

    /// Credits a partition from outside the purchase pipeline.
    ///
    /// Award schedules are an out-of-engine concern; the boundary just tells
    /// the ledger how much arrived and where.
    pub fn award(&mut self, partition: PartitionId, amount: i64) {
        self.balances.credit(partition, amount);
        self.revision += 1;
    }

    // ------------------------------------------------------------------
    // Engine mutators
    // ------------------------------------------------------------------

    pub(crate) fn push_record(
        &mut self,
        feature: FeatureKey,
        rank_delta: u32,
        source: PurchaseSource,
        debits: Vec<Debit>,
    ) -> RecordSeq {
        let seq = RecordSeq(self.records.last().map(|r| r.seq.0 + 1).unwrap_or(0));
        self.adjust_rank(&feature, i64::from(rank_delta));
        self.records.push(PurchaseRecord {
            seq,
            feature,
            rank_delta,
            source,
            debits,
        });
        self.revision += 1;
        seq
    }

    pub(crate) fn remove_record(&mut self, seq: RecordSeq) -> Option<PurchaseRecord> {
        let index = self.records.iter().position(|record| record.seq == seq)?;
        let record = self.records.remove(index);
        self.adjust_rank(&record.feature, -i64::from(record.rank_delta));
        self.revision += 1;
        Some(record)
    }

    pub(crate) fn set_record_source(&mut self, seq: RecordSeq, source: PurchaseSource) {
        if let Some(record) = self.records.iter_mut().find(|record| record.seq == seq) {
            record.source = source;
            self.revision += 1;
        }
    }

    /// Takes the recorded debits off a record, leaving it cost-free.
    ///
    /// Used by the refund collision policy: once the cost is returned, the
    /// record must not refund again on retraction.
    pub(crate) fn take_record_debits(&mut self, seq: RecordSeq) -> Vec<Debit> {
        match self.records.iter_mut().find(|record| record.seq == seq) {
            Some(record) => {
                self.revision += 1;
                std::mem::take(&mut record.debits)
            }
            None => Vec::new(),
        }
    }

    pub(crate) fn restore_record_debits(&mut self, seq: RecordSeq, debits: Vec<Debit>) {
        if let Some(record) = self.records.iter_mut().find(|record| record.seq == seq) {
            record.debits = debits;
            self.revision += 1;
        }
    }

    pub(crate) fn debit_all(&mut self, debits: &[Debit]) {
        for debit in debits {
            self.balances.debit(debit.partition.clone(), debit.amount);
        }
        self.revision += 1;
    }

    pub(crate) fn credit_all(&mut self, debits: &[Debit]) {
        for debit in debits {
            self.balances.credit(debit.partition.clone(), debit.amount);
        }
        self.revision += 1;
    }

    pub(crate) fn activate(&mut self, feature: FeatureKey, activation: Activation) {
        self.activations.insert(feature, activation);
        self.revision += 1;
    }

    pub(crate) fn deactivate(&mut self, feature: &FeatureKey) -> Option<Activation> {
        let activation = self.activations.remove(feature)?;
        self.revision += 1;
        Some(activation)
    }

    pub(crate) fn push_fill(&mut self, fill: SlotFill) {
        self.fills.push(fill);
        self.revision += 1;
    }

    pub(crate) fn remove_fill(&mut self, slot: &SlotKey, feature: &FeatureKey) -> Option<SlotFill> {
        let index = self
            .fills
            .iter()
            .rposition(|fill| &fill.slot == slot && &fill.feature == feature)?;
        self.revision += 1;
        Some(self.fills.remove(index))
    }

    pub(crate) fn add_granted_capacity(&mut self, slot: &SlotKey, count: u32) {
        *self.granted_capacity.entry(slot.clone()).or_insert(0) += count;
        self.revision += 1;
    }

    pub(crate) fn remove_granted_capacity(&mut self, slot: &SlotKey, count: u32) {
        if let Some(current) = self.granted_capacity.get_mut(slot) {
            *current = current.saturating_sub(count);
            if *current == 0 {
                self.granted_capacity.remove(slot);
            }
        }
        self.revision += 1;
    }

    /// Partitions currently below zero.
    pub(crate) fn overdrawn(&self) -> Vec<(PartitionId, i64)> {
        self.balances.overdrawn()
    }

    fn adjust_rank(&mut self, feature: &FeatureKey, delta: i64) {
        let rank = self.ranks.entry(feature.clone()).or_insert(0);
        *rank += delta;
        if *rank == 0 {
            self.ranks.remove(feature);
        }
    }
}

impl PartialEq for Ledger {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
            && self.balances == other.balances
            && self.fills == other.fills
            && self.activations == other.activations
            && self.granted_capacity == other.granted_capacity
            && self.ranks == other.ranks
    }
}

impl Eq for Ledger {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_index_tracks_records() {
        let mut ledger = Ledger::new();
        ledger.push_record("dodge".into(), 2, PurchaseSource::Direct, vec![]);
        assert_eq!(ledger.rank_of(&"dodge".into()), 2);

        ledger.push_record("dodge".into(), 1, PurchaseSource::Direct, vec![]);
        assert_eq!(ledger.rank_of(&"dodge".into()), 3);

        let seq = ledger.records()[1].seq;
        ledger.remove_record(seq);
        assert_eq!(ledger.rank_of(&"dodge".into()), 2);
    }

    #[test]
    fn record_seq_is_derived_from_tail() {
        let mut ledger = Ledger::new();
        let first = ledger.push_record("a".into(), 1, PurchaseSource::Direct, vec![]);
        let second = ledger.push_record("b".into(), 1, PurchaseSource::Direct, vec![]);
        assert_eq!(first, RecordSeq(0));
        assert_eq!(second, RecordSeq(1));

        ledger.remove_record(second);
        let reused = ledger.push_record("c".into(), 1, PurchaseSource::Direct, vec![]);
        assert_eq!(reused, RecordSeq(1));
    }

    #[test]
    fn equality_ignores_revision() {
        let mut a = Ledger::new();
        let mut b = Ledger::new();
        a.award(PartitionId::global("cp"), 5);
        a.award(PartitionId::global("cp"), 5);
        b.award(PartitionId::global("cp"), 10);
        assert_eq!(a, b);
        assert_ne!(a.revision(), b.revision());
    }

    #[test]
    fn rank_outside_slot_excludes_slot_records() {
        let mut ledger = Ledger::new();
        ledger.push_record("shield".into(), 1, PurchaseSource::Direct, vec![]);
        ledger.push_record("shield".into(), 1, PurchaseSource::Slot("bonus".into()), vec![]);

        assert_eq!(ledger.rank_of(&"shield".into()), 2);
        assert_eq!(ledger.rank_outside_slot(&"shield".into(), &"bonus".into()), 1);
        assert_eq!(ledger.rank_outside_slot(&"shield".into(), &"other".into()), 2);
    }

    #[test]
    fn activation_round_trip_restores_state() {
        let mut ledger = Ledger::new();
        let credits = vec![Debit {
            partition: PartitionId::local("bp", "breed-elf"),
            amount: 3,
        }];
        ledger.credit_all(&credits);
        ledger.activate(
            "breed-elf".into(),
            Activation {
                credits: credits.clone(),
                capacity: vec![("elf-bonus".into(), 1)],
            },
        );
        ledger.add_granted_capacity(&"elf-bonus".into(), 1);

        let activation = ledger.deactivate(&"breed-elf".into()).unwrap();
        ledger.debit_all(&activation.credits);
        for (slot, count) in &activation.capacity {
            ledger.remove_granted_capacity(slot, *count);
        }

        assert_eq!(ledger, Ledger::new());
    }
}
