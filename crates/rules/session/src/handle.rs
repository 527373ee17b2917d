//! Client-facing handle for one character session.

use tokio::sync::{mpsc, oneshot};

use rules_core::{
    AttributeKey, CostResult, Eligibility, FeatureKey, LedgerSnapshot, PartitionId,
    PurchaseOutcome, PurchaseRequest, RecordSeq, RetractOutcome, SlotFillResult, SlotKey,
};

use crate::error::{Result, SessionError};
use crate::registry::CharacterId;
use crate::worker::Command;

/// Cheap, cloneable handle to a character's worker task.
///
/// Every call is serialized through the worker's command channel; callers on
/// different tasks can hold clones freely without risking interleaved partial
/// updates.
#[derive(Clone)]
pub struct CharacterHandle {
    character: CharacterId,
    command_tx: mpsc::Sender<Command>,
}

impl CharacterHandle {
    pub(crate) fn new(character: CharacterId, command_tx: mpsc::Sender<Command>) -> Self {
        Self {
            character,
            command_tx,
        }
    }

    pub fn character(&self) -> &CharacterId {
        &self.character
    }

    /// Pure eligibility query.
    pub async fn can_purchase(
        &self,
        feature: impl Into<FeatureKey>,
        rank_delta: i32,
    ) -> Result<Eligibility> {
        let feature = feature.into();
        self.call(|reply| Command::CanPurchase {
            feature,
            rank_delta,
            reply,
        })
        .await?
    }

    /// Side-effect-free cost preview.
    pub async fn resolve_cost(&self, request: PurchaseRequest) -> Result<CostResult> {
        self.call(|reply| Command::ResolveCost { request, reply }).await?
    }

    /// Full purchase pipeline: eligibility, cost, commit.
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseOutcome> {
        self.call(|reply| Command::Purchase { request, reply }).await?
    }

    /// Fills a slot, applying the slot's collision policy.
    pub async fn fill_slot(
        &self,
        slot: impl Into<SlotKey>,
        feature: impl Into<FeatureKey>,
        substitute: Option<FeatureKey>,
    ) -> Result<SlotFillResult> {
        let slot = slot.into();
        let feature = feature.into();
        self.call(|reply| Command::FillSlot {
            slot,
            feature,
            substitute,
            reply,
        })
        .await?
    }

    /// Retracts a committed purchase record.
    pub async fn retract(&self, seq: RecordSeq) -> Result<RetractOutcome> {
        self.call(|reply| Command::Retract { seq, reply }).await?
    }

    /// Resolved value of an attribute.
    pub async fn value_of(&self, attribute: impl Into<AttributeKey>) -> Result<i64> {
        let attribute = attribute.into();
        self.call(|reply| Command::ValueOf { attribute, reply }).await?
    }

    /// Funds a partition from the boundary (starting pools, event awards).
    pub async fn award(&self, partition: PartitionId, amount: i64) -> Result<()> {
        self.call(|reply| Command::Award {
            partition,
            amount,
            reply,
        })
        .await?
    }

    /// Serializable snapshot of the ledger for persistence.
    pub async fn snapshot(&self) -> Result<LedgerSnapshot> {
        self.call(|reply| Command::Snapshot { reply }).await?
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> std::result::Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }
}
