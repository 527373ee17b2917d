//! Slot resolver: grants from a constrained option set, with collision
//! handling for features the character already owns.

use crate::defs::{CollisionPolicy, FeatureKey, SlotKey};
use crate::engine::{RulesEngine, SlotError, SlotFillResult, shortfalls};
use crate::ledger::{
    Debit, FillOutcome, Ledger, PurchaseSource, RecordSeq, RefundEntry, SlotFill,
};

impl RulesEngine<'_> {
    /// Fills a slot with the chosen feature.
    ///
    /// The fill consumes one unit of the slot's capacity (base cardinality
    /// plus granted capacity). When the chosen feature is already owned
    /// outside this slot, the slot's collision policy decides what happens;
    /// `substitute` is only consulted in that case.
    pub fn fill_slot(
        &self,
        ledger: &mut Ledger,
        slot: &SlotKey,
        feature: &FeatureKey,
        substitute: Option<&FeatureKey>,
    ) -> Result<SlotFillResult, SlotError> {
        let slot_def = self.ruleset().get_slot(slot)?;
        let capacity = slot_def.cardinality + ledger.granted_capacity(slot);
        if ledger.fill_count(slot) as u32 >= capacity {
            return Err(SlotError::SlotExhausted(slot.clone()));
        }

        let feature_def = self.ruleset().get_feature(feature)?;
        if !slot_def.filter.matches(feature_def) {
            return Err(SlotError::NotEligible {
                slot: slot.clone(),
                feature: feature.clone(),
            });
        }

        if ledger.rank_outside_slot(feature, slot) == 0 {
            return self.grant_from_slot(ledger, slot, feature, FillOutcome::Granted);
        }

        match slot_def.policy {
            CollisionPolicy::NoOp => {
                ledger.push_fill(SlotFill {
                    slot: slot.clone(),
                    feature: feature.clone(),
                    outcome: FillOutcome::AlreadyOwned,
                });
                Ok(SlotFillResult {
                    slot: slot.clone(),
                    granted: None,
                    outcome: FillOutcome::AlreadyOwned,
                    refunded: Vec::new(),
                    changed_features: Vec::new(),
                })
            }

            CollisionPolicy::Refund => Ok(self.refund_collision(ledger, slot, feature)),

            CollisionPolicy::Substitute => {
                let Some(alternate) = substitute else {
                    return Err(SlotError::SubstituteRequired {
                        slot: slot.clone(),
                        feature: feature.clone(),
                    });
                };
                let alternate_def = self.ruleset().get_feature(alternate)?;
                if !slot_def.filter.matches(alternate_def) {
                    return Err(SlotError::NotEligible {
                        slot: slot.clone(),
                        feature: alternate.clone(),
                    });
                }
                if ledger.rank_outside_slot(alternate, slot) > 0 {
                    // The alternate collides too; the caller must pick again.
                    return Err(SlotError::SubstituteRequired {
                        slot: slot.clone(),
                        feature: alternate.clone(),
                    });
                }
                self.grant_from_slot(
                    ledger,
                    slot,
                    alternate,
                    FillOutcome::Substituted {
                        requested: feature.clone(),
                    },
                )
            }
        }
    }

    /// Reverses the most recent fill of `feature` on `slot`.
    ///
    /// Symmetric to [`RulesEngine::fill_slot`]: granted fills retract their
    /// grant record, no-op fills are simply removed, and refunded fills
    /// re-charge the original cost and restore direct provenance (failing if
    /// the partitions can no longer cover it).
    pub fn unfill_slot(
        &self,
        ledger: &mut Ledger,
        slot: &SlotKey,
        feature: &FeatureKey,
    ) -> Result<SlotFillResult, SlotError> {
        let fill = ledger
            .fills()
            .iter()
            .rev()
            .find(|fill| &fill.slot == slot && &fill.feature == feature)
            .cloned()
            .ok_or_else(|| SlotError::FillNotFound {
                slot: slot.clone(),
                feature: feature.clone(),
            })?;

        match fill.outcome {
            FillOutcome::Granted | FillOutcome::Substituted { .. } => {
                let seq = ledger
                    .records()
                    .iter()
                    .rev()
                    .find(|record| {
                        &record.feature == feature
                            && record.source == PurchaseSource::Slot(slot.clone())
                    })
                    .map(|record| record.seq)
                    .ok_or_else(|| SlotError::FillNotFound {
                        slot: slot.clone(),
                        feature: feature.clone(),
                    })?;
                let retracted = self.retract(ledger, seq)?;
                Ok(SlotFillResult {
                    slot: slot.clone(),
                    granted: None,
                    outcome: fill.outcome,
                    refunded: retracted.refunded,
                    changed_features: retracted.changed_features,
                })
            }

            FillOutcome::AlreadyOwned => {
                ledger.remove_fill(slot, feature);
                Ok(SlotFillResult {
                    slot: slot.clone(),
                    granted: None,
                    outcome: FillOutcome::AlreadyOwned,
                    refunded: Vec::new(),
                    changed_features: Vec::new(),
                })
            }

            FillOutcome::Refunded { ref entries } => {
                let recharge: Vec<Debit> = entries
                    .iter()
                    .flat_map(|entry| entry.debits.iter().cloned())
                    .collect();
                let lacking = shortfalls(ledger, &recharge);
                if !lacking.is_empty() {
                    return Err(SlotError::Retraction(
                        crate::engine::RetractError::RetractionConflict {
                            conflicts: lacking
                                .into_iter()
                                .map(|shortfall| crate::engine::Conflict::PartitionOverdrawn {
                                    partition: shortfall.partition,
                                    balance: shortfall.available - shortfall.required,
                                })
                                .collect(),
                        },
                    ));
                }

                ledger.debit_all(&recharge);
                for entry in entries {
                    ledger.restore_record_debits(entry.seq, entry.debits.clone());
                    ledger.set_record_source(entry.seq, PurchaseSource::Direct);
                }
                ledger.remove_fill(slot, feature);
                Ok(SlotFillResult {
                    slot: slot.clone(),
                    granted: None,
                    outcome: fill.outcome.clone(),
                    refunded: Vec::new(),
                    changed_features: Vec::new(),
                })
            }
        }
    }

    /// Refund collision: return the original cost and hand provenance to the
    /// slot. Net rank is unchanged.
    fn refund_collision(
        &self,
        ledger: &mut Ledger,
        slot: &SlotKey,
        feature: &FeatureKey,
    ) -> SlotFillResult {
        let seqs: Vec<RecordSeq> = ledger
            .records()
            .iter()
            .filter(|record| {
                &record.feature == feature && record.source == PurchaseSource::Direct
            })
            .map(|record| record.seq)
            .collect();

        let mut entries = Vec::new();
        let mut refunded = Vec::new();
        for seq in seqs {
            let debits = ledger.take_record_debits(seq);
            ledger.credit_all(&debits);
            ledger.set_record_source(seq, PurchaseSource::Slot(slot.clone()));
            refunded.extend(debits.clone());
            entries.push(RefundEntry { seq, debits });
        }

        let outcome = FillOutcome::Refunded { entries };
        ledger.push_fill(SlotFill {
            slot: slot.clone(),
            feature: feature.clone(),
            outcome: outcome.clone(),
        });

        SlotFillResult {
            slot: slot.clone(),
            granted: None,
            outcome,
            refunded,
            changed_features: Vec::new(),
        }
    }

    /// Grants one rank of `feature` through the slot at no currency cost.
    fn grant_from_slot(
        &self,
        ledger: &mut Ledger,
        slot: &SlotKey,
        feature: &FeatureKey,
        outcome: FillOutcome,
    ) -> Result<SlotFillResult, SlotError> {
        self.can_purchase(ledger, feature, 1)
            .map_err(|source| SlotError::GrantRejected {
                slot: slot.clone(),
                feature: feature.clone(),
                source,
            })?;

        let mut changed = Vec::new();
        self.commit_rank(
            ledger,
            feature,
            1,
            PurchaseSource::Slot(slot.clone()),
            Vec::new(),
            &mut changed,
        )?;
        ledger.push_fill(SlotFill {
            slot: slot.clone(),
            feature: feature.clone(),
            outcome: outcome.clone(),
        });

        Ok(SlotFillResult {
            slot: slot.clone(),
            granted: Some(feature.clone()),
            outcome,
            refunded: Vec::new(),
            changed_features: changed,
        })
    }
}
