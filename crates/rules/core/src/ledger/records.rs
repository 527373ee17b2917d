//! Purchase records and slot fill entries.

use std::fmt;

use crate::defs::{FeatureKey, SlotKey};
use crate::ledger::Debit;

/// Position of a record in the ledger's purchase sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecordSeq(pub u64);

impl fmt::Display for RecordSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a purchase record came from.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PurchaseSource {
    /// Bought directly with currency.
    Direct,
    /// Granted by filling a slot.
    Slot(SlotKey),
    /// Granted as an effect of owning another feature.
    Granted(FeatureKey),
}

/// One committed rank change on the ledger.
///
/// Debits are recorded exactly as applied so retraction can reverse them
/// without recomputation; a cost-curve change in a later ruleset revision
/// must not alter what an old purchase refunds.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PurchaseRecord {
    pub seq: RecordSeq,
    pub feature: FeatureKey,
    pub rank_delta: u32,
    pub source: PurchaseSource,
    /// Currency removed from partitions by this purchase.
    pub debits: Vec<Debit>,
}

/// One-shot effects applied when a feature became owned.
///
/// Grant effects belong to ownership, not to any single purchase record:
/// retracting one of several records of an owned feature must not disturb
/// them. The activation entry records exactly what was applied so losing the
/// feature reverses it exactly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Activation {
    /// Currency credited to partitions when the feature became owned.
    pub credits: Vec<Debit>,
    /// Slot capacity added when the feature became owned.
    pub capacity: Vec<(SlotKey, u32)>,
}

/// The cost taken off one record by a refund collision.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RefundEntry {
    pub seq: RecordSeq,
    pub debits: Vec<Debit>,
}

/// How a slot fill was resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FillOutcome {
    /// The feature was granted fresh by the slot.
    Granted,
    /// The feature was already owned; the slot consumed nothing (no-op
    /// collision policy).
    AlreadyOwned,
    /// The original purchase cost was refunded and provenance reassigned to
    /// the slot (refund collision policy). Entries are kept per record so the
    /// fill can be reversed symmetrically.
    Refunded { entries: Vec<RefundEntry> },
    /// An alternate feature was granted in place of the requested one
    /// (substitute collision policy).
    Substituted { requested: FeatureKey },
}

/// One fill assignment on a slot.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotFill {
    pub slot: SlotKey,
    /// The feature the character holds through this fill.
    pub feature: FeatureKey,
    pub outcome: FillOutcome,
}
