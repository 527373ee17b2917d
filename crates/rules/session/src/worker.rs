//! Worker task that owns one character's ledger.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use rules_core::{
    AttributeCache, AttributeKey, CostResult, Eligibility, FeatureKey, Ledger, LedgerSnapshot,
    PartitionId, PurchaseOutcome, PurchaseRequest, RecordSeq, RetractOutcome, Ruleset,
    RulesEngine, SlotFillResult, SlotKey,
};

use crate::error::Result;
use crate::registry::CharacterId;

/// Commands processed by a character worker, one at a time.
pub(crate) enum Command {
    CanPurchase {
        feature: FeatureKey,
        rank_delta: i32,
        reply: oneshot::Sender<Result<Eligibility>>,
    },
    ResolveCost {
        request: PurchaseRequest,
        reply: oneshot::Sender<Result<CostResult>>,
    },
    Purchase {
        request: PurchaseRequest,
        reply: oneshot::Sender<Result<PurchaseOutcome>>,
    },
    FillSlot {
        slot: SlotKey,
        feature: FeatureKey,
        substitute: Option<FeatureKey>,
        reply: oneshot::Sender<Result<SlotFillResult>>,
    },
    Retract {
        seq: RecordSeq,
        reply: oneshot::Sender<Result<RetractOutcome>>,
    },
    ValueOf {
        attribute: AttributeKey,
        reply: oneshot::Sender<Result<i64>>,
    },
    Award {
        partition: PartitionId,
        amount: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<LedgerSnapshot>>,
    },
}

/// Owns the ledger and attribute cache for one character.
///
/// Single-writer by construction: the worker is the only task with mutable
/// access, and commands drain from the channel strictly in order.
pub(crate) struct CharacterWorker {
    character: CharacterId,
    ruleset: Arc<Ruleset>,
    ledger: Ledger,
    cache: AttributeCache,
    command_rx: mpsc::Receiver<Command>,
}

impl CharacterWorker {
    pub(crate) fn new(
        character: CharacterId,
        ruleset: Arc<Ruleset>,
        ledger: Ledger,
        command_rx: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            character,
            ruleset,
            ledger,
            cache: AttributeCache::new(),
            command_rx,
        }
    }

    /// Main worker loop. Exits when every handle is dropped.
    pub(crate) async fn run(mut self) {
        let span = tracing::info_span!("character_session", character = %self.character);
        span.in_scope(|| tracing::debug!("session started"));

        while let Some(command) = self.command_rx.recv().await {
            span.in_scope(|| self.handle_command(command));
        }

        span.in_scope(|| tracing::debug!("session closed"));
    }

    fn handle_command(&mut self, command: Command) {
        let engine = RulesEngine::new(&self.ruleset);
        match command {
            Command::CanPurchase {
                feature,
                rank_delta,
                reply,
            } => {
                let result = engine
                    .can_purchase(&self.ledger, &feature, rank_delta)
                    .map_err(Into::into);
                let _ = reply.send(result);
            }

            Command::ResolveCost { request, reply } => {
                let result = engine
                    .resolve_cost(&self.ledger, &request)
                    .map_err(Into::into);
                let _ = reply.send(result);
            }

            Command::Purchase { request, reply } => {
                let result = engine.purchase(&mut self.ledger, &request);
                match &result {
                    Ok(outcome) => {
                        tracing::debug!(
                            feature = %outcome.feature,
                            new_rank = outcome.new_rank,
                            "purchase committed"
                        );
                        self.refresh_cache(&outcome.changed_features);
                    }
                    Err(error) => {
                        tracing::debug!(phase = error.phase().as_str(), %error, "purchase rejected");
                    }
                }
                let _ = reply.send(result.map_err(Into::into));
            }

            Command::FillSlot {
                slot,
                feature,
                substitute,
                reply,
            } => {
                let result =
                    engine.fill_slot(&mut self.ledger, &slot, &feature, substitute.as_ref());
                if let Ok(fill) = &result {
                    tracing::debug!(slot = %fill.slot, granted = ?fill.granted, "slot filled");
                    self.refresh_cache(&fill.changed_features);
                }
                let _ = reply.send(result.map_err(Into::into));
            }

            Command::Retract { seq, reply } => {
                let result = engine.retract(&mut self.ledger, seq);
                if let Ok(outcome) = &result {
                    tracing::debug!(feature = %outcome.feature, "purchase retracted");
                    self.refresh_cache(&outcome.changed_features);
                }
                let _ = reply.send(result.map_err(Into::into));
            }

            Command::ValueOf { attribute, reply } => {
                let result = self
                    .cache
                    .value_of(&self.ruleset, &self.ledger, &attribute)
                    .map_err(Into::into);
                let _ = reply.send(result);
            }

            Command::Award {
                partition,
                amount,
                reply,
            } => {
                self.ledger.award(partition, amount);
                let _ = reply.send(Ok(()));
            }

            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.ledger.snapshot()));
            }
        }
    }

    fn refresh_cache(&mut self, changed: &[FeatureKey]) {
        if let Err(error) = self
            .cache
            .recompute_affected(&self.ruleset, &self.ledger, changed)
        {
            // Evaluation failures here indicate a ruleset/engine bug; the
            // stale cache self-heals on the next read via the revision check.
            tracing::warn!(%error, "attribute cache refresh failed");
        }
    }
}
