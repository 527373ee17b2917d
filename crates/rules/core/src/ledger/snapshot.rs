//! Serializable ledger snapshots for the persistence boundary.
//!
//! The core does not dictate a storage format; a snapshot is plain data the
//! persistence layer can store and restore verbatim. The digest lets a store
//! verify integrity on the way back in.

use crate::defs::FeatureKey;
use crate::ledger::{Activation, Ledger, PartitionId, PurchaseRecord, SlotFill};

/// One funded partition in a snapshot.
///
/// Balances are flattened to entries so the snapshot stays representable in
/// formats without structured map keys (JSON).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BalanceEntry {
    pub partition: PartitionId,
    pub amount: i64,
}

/// Complete serializable state of one character's ledger.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LedgerSnapshot {
    pub records: Vec<PurchaseRecord>,
    pub balances: Vec<BalanceEntry>,
    pub fills: Vec<SlotFill>,
    pub activations: Vec<(FeatureKey, Activation)>,
}

impl LedgerSnapshot {
    /// SHA-256 over the deterministic binary encoding of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns a `bincode` error if the snapshot cannot be encoded, which
    /// does not happen for snapshots produced by [`Ledger::snapshot`].
    pub fn digest(&self) -> Result<[u8; 32], bincode::Error> {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        let bytes = bincode::serialize(self)?;
        hasher.update(&bytes);
        Ok(hasher.finalize().into())
    }
}

impl Ledger {
    /// Produces a serializable snapshot of the current state.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            records: self.records().to_vec(),
            balances: self
                .balances()
                .map(|(partition, amount)| BalanceEntry {
                    partition: partition.clone(),
                    amount,
                })
                .collect(),
            fills: self.fills().to_vec(),
            activations: self
                .activations
                .iter()
                .map(|(feature, activation)| (feature.clone(), activation.clone()))
                .collect(),
        }
    }

    /// Rebuilds a ledger from a stored snapshot.
    ///
    /// The rank and capacity indexes are rederived; the revision counter
    /// starts fresh since it is not logical state.
    pub fn restore(snapshot: LedgerSnapshot) -> Ledger {
        let mut ledger = Ledger::new();
        for entry in snapshot.balances {
            ledger.award(entry.partition, entry.amount);
        }
        for record in snapshot.records {
            let PurchaseRecord {
                feature,
                rank_delta,
                source,
                debits,
                ..
            } = record;
            ledger.push_record(feature, rank_delta, source, debits);
        }
        for fill in snapshot.fills {
            ledger.push_fill(fill);
        }
        for (feature, activation) in snapshot.activations {
            for (slot, count) in &activation.capacity {
                ledger.add_granted_capacity(slot, *count);
            }
            ledger.activate(feature, activation);
        }
        ledger
    }
}
