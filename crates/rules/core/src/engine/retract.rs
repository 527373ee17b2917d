//! Retraction: the symmetric inverse of a committed purchase.
//!
//! Retraction re-runs the purchase gates in reverse on a working copy of the
//! ledger, then installs the result only if no constraint that currently
//! holds would be violated. Recorded debits are refunded exactly as applied;
//! ownership effects cascade away when a feature's rank returns to zero.

use crate::engine::{Conflict, RetractError, RetractOutcome, RulesEngine};
use crate::expr::{EvalContext, check_pred};
use crate::ledger::{Debit, Ledger, PurchaseSource, RecordSeq};

use crate::defs::FeatureKey;

impl RulesEngine<'_> {
    /// Retracts one committed purchase record.
    ///
    /// All-or-nothing: on conflict the ledger is untouched and every conflict
    /// is reported. Purchasing and immediately retracting restores the ledger
    /// to an identical prior state.
    pub fn retract(
        &self,
        ledger: &mut Ledger,
        seq: RecordSeq,
    ) -> Result<RetractOutcome, RetractError> {
        let record = ledger
            .record(seq)
            .cloned()
            .ok_or(RetractError::RecordNotFound(seq))?;

        let mut work = ledger.clone();
        let mut changed = Vec::new();
        let mut refunded = Vec::new();
        self.remove_record_cascading(&mut work, seq, &mut changed, &mut refunded)?;

        let conflicts = self.retraction_conflicts(&work)?;
        if !conflicts.is_empty() {
            return Err(RetractError::RetractionConflict { conflicts });
        }

        *ledger = work;
        Ok(RetractOutcome {
            feature: record.feature,
            rank_delta: record.rank_delta,
            refunded,
            changed_features: changed,
        })
    }

    /// Removes a record, refunds its debits, and unwinds ownership effects
    /// when the feature drops to rank zero.
    fn remove_record_cascading(
        &self,
        work: &mut Ledger,
        seq: RecordSeq,
        changed: &mut Vec<FeatureKey>,
        refunded: &mut Vec<Debit>,
    ) -> Result<(), RetractError> {
        let Some(record) = work.remove_record(seq) else {
            return Ok(());
        };

        work.credit_all(&record.debits);
        refunded.extend(record.debits.iter().cloned());
        changed.push(record.feature.clone());

        // A slot-sourced record takes its fill assignment with it.
        if let PurchaseSource::Slot(slot) = &record.source {
            work.remove_fill(slot, &record.feature);
        }

        self.deactivate_if_unowned(work, &record.feature, changed, refunded)
    }

    /// Reverses one-shot grant effects once a feature is no longer owned.
    fn deactivate_if_unowned(
        &self,
        work: &mut Ledger,
        feature: &FeatureKey,
        changed: &mut Vec<FeatureKey>,
        refunded: &mut Vec<Debit>,
    ) -> Result<(), RetractError> {
        if work.rank_of(feature) != 0 || !work.is_active(feature) {
            return Ok(());
        }
        let Some(activation) = work.deactivate(feature) else {
            return Ok(());
        };

        work.debit_all(&activation.credits);
        for (slot, count) in &activation.capacity {
            work.remove_granted_capacity(slot, *count);
        }

        // Ranks this feature granted elsewhere cascade away with it.
        let granted: Vec<RecordSeq> = work
            .records()
            .iter()
            .filter(|record| record.source == PurchaseSource::Granted(feature.clone()))
            .map(|record| record.seq)
            .collect();
        for seq in granted {
            self.remove_record_cascading(work, seq, changed, refunded)?;
        }
        Ok(())
    }

    /// Constraints that would stop holding in the post-removal state.
    fn retraction_conflicts(&self, work: &Ledger) -> Result<Vec<Conflict>, RetractError> {
        let mut conflicts = Vec::new();

        // Granted funds already spent leave their partition overdrawn.
        for (partition, balance) in work.overdrawn() {
            conflicts.push(Conflict::PartitionOverdrawn { partition, balance });
        }

        // Fills beyond remaining capacity.
        for slot_def in self.ruleset().slots() {
            let capacity = slot_def.cardinality + work.granted_capacity(&slot_def.key);
            let fills = work.fill_count(&slot_def.key);
            if fills as u32 > capacity {
                conflicts.push(Conflict::SlotOverfilled {
                    slot: slot_def.key.clone(),
                    fills,
                    capacity,
                });
            }
        }

        // Fills whose feature would no longer be owned.
        for fill in work.fills() {
            if work.rank_of(&fill.feature) == 0 {
                conflicts.push(Conflict::FillInvalid {
                    slot: fill.slot.clone(),
                    feature: fill.feature.clone(),
                });
            }
        }

        // Prerequisites are always-on: every remaining owned feature must
        // still satisfy its requirements.
        let owned: Vec<FeatureKey> = work
            .owned_features()
            .map(|(feature, _)| feature.clone())
            .collect();
        for feature in owned {
            let def = self.ruleset().get_feature(&feature)?;
            let ctx = EvalContext::new(self.ruleset(), work);
            let unmet = check_pred(&def.requires, &ctx)?;
            if !unmet.is_empty() {
                conflicts.push(Conflict::PrerequisiteBroken { feature, unmet });
            }
        }

        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{
        CollisionPolicy, CurrencyDef, Effect, FeatureDefBuilder, FeatureMatcher, RulesetBuilder,
        SlotDef,
    };
    use crate::engine::tests::{funded_ledger, tempest_ruleset};
    use crate::engine::{PurchaseRequest, RulesEngine};
    use crate::expr::Pred;
    use crate::ledger::PartitionId;

    #[test]
    fn purchase_then_retract_is_identity() {
        let ruleset = tempest_ruleset();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = funded_ledger();
        let before = ledger.clone();

        let outcome = engine
            .purchase(&mut ledger, &PurchaseRequest::new("basic-archery", 2))
            .unwrap();
        assert_ne!(ledger, before);

        engine.retract(&mut ledger, outcome.seq).unwrap();
        assert_eq!(ledger, before);
    }

    #[test]
    fn grant_cascade_unwinds_with_the_grantor() {
        let ruleset = RulesetBuilder::new()
            .currency(CurrencyDef::local("bp", "Breed Points"))
            .feature(
                FeatureDefBuilder::new("breed-elf", "Elf")
                    .effect(Effect::GrantCurrency {
                        currency: "bp".into(),
                        amount: 3,
                    })
                    .effect(Effect::GrantFeature {
                        feature: "night-vision".into(),
                        ranks: 1,
                    })
                    .build(),
            )
            .feature(FeatureDefBuilder::new("night-vision", "Night Vision").build())
            .build()
            .unwrap();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = Ledger::new();
        let before = ledger.clone();

        let outcome = engine
            .purchase(&mut ledger, &PurchaseRequest::new("breed-elf", 1))
            .unwrap();
        assert_eq!(ledger.rank_of(&"night-vision".into()), 1);
        assert_eq!(ledger.balance(&PartitionId::local("bp", "breed-elf")), 3);

        engine.retract(&mut ledger, outcome.seq).unwrap();
        assert_eq!(ledger, before);
    }

    #[test]
    fn retraction_blocked_by_dependent_prerequisite() {
        let ruleset = tempest_ruleset();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = funded_ledger();
        ledger.award(PartitionId::global("skill-points"), 10);

        let basic = engine
            .purchase(&mut ledger, &PurchaseRequest::new("basic-archery", 3))
            .unwrap();
        engine
            .purchase(&mut ledger, &PurchaseRequest::new("master-archery", 1))
            .unwrap();

        let state_before = ledger.clone();
        let err = engine.retract(&mut ledger, basic.seq).unwrap_err();
        match err {
            RetractError::RetractionConflict { conflicts } => {
                assert!(conflicts
                    .iter()
                    .any(|c| matches!(c, Conflict::PrerequisiteBroken { feature, .. }
                        if feature.as_str() == "master-archery")));
            }
            other => panic!("expected RetractionConflict, got {other:?}"),
        }
        assert_eq!(ledger, state_before);
    }

    #[test]
    fn retraction_blocked_when_granted_funds_are_spent() {
        let ruleset = RulesetBuilder::new()
            .currency(CurrencyDef::local("bp", "Breed Points"))
            .feature(
                FeatureDefBuilder::new("breed-elf", "Elf")
                    .effect(Effect::GrantCurrency {
                        currency: "bp".into(),
                        amount: 3,
                    })
                    .build(),
            )
            .feature(
                FeatureDefBuilder::new("keen-senses", "Keen Senses")
                    .parent("breed-elf")
                    .cost("bp", 2)
                    .build(),
            )
            .build()
            .unwrap();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = Ledger::new();

        let elf = engine
            .purchase(&mut ledger, &PurchaseRequest::new("breed-elf", 1))
            .unwrap();
        engine
            .purchase(&mut ledger, &PurchaseRequest::new("keen-senses", 1))
            .unwrap();

        // Removing the breed takes its 3 granted points with it, but 2 are
        // already spent; the partition would go negative.
        let err = engine.retract(&mut ledger, elf.seq).unwrap_err();
        match err {
            RetractError::RetractionConflict { conflicts } => {
                assert!(conflicts
                    .iter()
                    .any(|c| matches!(c, Conflict::PartitionOverdrawn { .. })));
            }
            other => panic!("expected RetractionConflict, got {other:?}"),
        }
    }

    #[test]
    fn retracting_slot_record_unfills_the_slot() {
        let ruleset = RulesetBuilder::new()
            .feature(FeatureDefBuilder::new("gift", "Gift").tag("perk").build())
            .slot(SlotDef::new(
                "boon",
                "Boon",
                FeatureMatcher::any().with_tag("perk"),
                1,
                CollisionPolicy::NoOp,
            ))
            .build()
            .unwrap();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = Ledger::new();
        let before = ledger.clone();

        engine
            .fill_slot(&mut ledger, &"boon".into(), &"gift".into(), None)
            .unwrap();
        let seq = ledger.records()[0].seq;

        engine.retract(&mut ledger, seq).unwrap();
        assert_eq!(ledger.fill_count(&"boon".into()), 0);
        assert_eq!(ledger, before);
    }

    #[test]
    fn retracting_unknown_record_is_rejected() {
        let ruleset = tempest_ruleset();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = funded_ledger();

        let err = engine.retract(&mut ledger, RecordSeq(42)).unwrap_err();
        assert!(matches!(err, RetractError::RecordNotFound(RecordSeq(42))));
    }

    #[test]
    fn sellback_requires_prereq_to_survive() {
        // Removing a mid-chain feature is allowed when nothing depends on it.
        let ruleset = RulesetBuilder::new()
            .currency(CurrencyDef::global("cp", "Points"))
            .feature(
                FeatureDefBuilder::new("stealth", "Stealth")
                    .max_ranks(2)
                    .cost("cp", 1)
                    .build(),
            )
            .feature(
                FeatureDefBuilder::new("ambush", "Ambush")
                    .requires(Pred::requires_rank("stealth", 1))
                    .cost("cp", 2)
                    .build(),
            )
            .build()
            .unwrap();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = Ledger::new();
        ledger.award(PartitionId::global("cp"), 10);

        engine
            .purchase(&mut ledger, &PurchaseRequest::new("stealth", 1))
            .unwrap();
        let second = engine
            .purchase(&mut ledger, &PurchaseRequest::new("stealth", 1))
            .unwrap();
        engine
            .purchase(&mut ledger, &PurchaseRequest::new("ambush", 1))
            .unwrap();

        // Dropping stealth 2 -> 1 keeps ambush's requirement satisfied.
        engine.retract(&mut ledger, second.seq).unwrap();
        assert_eq!(ledger.rank_of(&"stealth".into()), 1);
        assert_eq!(ledger.rank_of(&"ambush".into()), 1);
    }
}
