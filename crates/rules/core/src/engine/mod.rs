//! Purchase pipeline and ledger mutation.
//!
//! The [`RulesEngine`] is the authoritative reducer for [`Ledger`] state. A
//! purchase passes through three gates - eligibility, cost, commit - and
//! either commits atomically or rejects with a structured error naming the
//! failing gate. Slot fulfillment and retraction run through the same
//! validate-then-commit discipline, so no error ever leaves a partially
//! mutated ledger.

mod cost;
mod eligibility;
mod errors;
mod retract;
mod slots;

pub use errors::{
    Conflict, CostError, EligibilityError, PurchaseError, PurchasePhase, RetractError, Shortfall,
    SlotError,
};

use crate::defs::{
    CurrencyKey, CurrencyScope, DefinitionError, Effect, FeatureKey, RankBound, Ruleset, SlotKey,
};
use crate::ledger::{
    Activation, Debit, FillOutcome, Ledger, PartitionId, PurchaseSource, RecordSeq,
};

/// Successful eligibility query result.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Eligibility {
    pub feature: FeatureKey,
    pub current_rank: i64,
    pub target_rank: i64,
}

/// A purchase to evaluate or commit.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PurchaseRequest {
    pub feature: FeatureKey,
    pub rank_delta: u32,
    /// Parent feature instance this purchase is "under", used to resolve the
    /// partition of local-scoped currencies. Defaults to the feature's
    /// defined parent when absent.
    pub under: Option<FeatureKey>,
}

impl PurchaseRequest {
    pub fn new(feature: impl Into<FeatureKey>, rank_delta: u32) -> Self {
        Self {
            feature: feature.into(),
            rank_delta,
            under: None,
        }
    }

    pub fn under(mut self, parent: impl Into<FeatureKey>) -> Self {
        self.under = Some(parent.into());
        self
    }
}

/// Exact debits a purchase would apply, one entry per partition.
///
/// Produced by the side-effect-free cost gate; committing it is a separate
/// explicit step, so cost computation is safely retryable and previewable.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostResult {
    pub feature: FeatureKey,
    pub rank_delta: u32,
    pub debits: Vec<Debit>,
}

impl CostResult {
    /// Total cost in one currency across its partitions.
    pub fn total(&self, currency: &CurrencyKey) -> i64 {
        self.debits
            .iter()
            .filter(|debit| &debit.partition.currency == currency)
            .map(|debit| debit.amount)
            .sum()
    }
}

/// Outcome of a committed purchase.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PurchaseOutcome {
    pub seq: RecordSeq,
    pub feature: FeatureKey,
    pub new_rank: i64,
    pub debits: Vec<Debit>,
    /// Every feature whose rank changed, including grant cascades. Feed this
    /// to the attribute cache for precise invalidation.
    pub changed_features: Vec<FeatureKey>,
}

/// Outcome of a slot fill (or its reversal).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotFillResult {
    pub slot: SlotKey,
    /// The feature granted by this fill, when one was granted.
    pub granted: Option<FeatureKey>,
    pub outcome: FillOutcome,
    /// Currency returned by a refund collision.
    pub refunded: Vec<Debit>,
    pub changed_features: Vec<FeatureKey>,
}

/// Outcome of a committed retraction.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetractOutcome {
    pub feature: FeatureKey,
    pub rank_delta: u32,
    /// Currency returned to partitions, grant reversals included.
    pub refunded: Vec<Debit>,
    pub changed_features: Vec<FeatureKey>,
}

/// Evaluates and commits purchases against one ruleset.
///
/// The engine holds only the shared read-only definitions; the ledger under
/// mutation is passed into every operation, so independent characters can be
/// evaluated concurrently by independent callers.
pub struct RulesEngine<'a> {
    ruleset: &'a Ruleset,
}

impl<'a> RulesEngine<'a> {
    pub fn new(ruleset: &'a Ruleset) -> Self {
        Self { ruleset }
    }

    pub fn ruleset(&self) -> &'a Ruleset {
        self.ruleset
    }

    /// Runs the full pipeline: eligibility, cost, commit. All-or-nothing.
    pub fn purchase(
        &self,
        ledger: &mut Ledger,
        request: &PurchaseRequest,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let delta = i32::try_from(request.rank_delta).unwrap_or(i32::MAX);
        self.can_purchase(ledger, &request.feature, delta)?;
        let cost = self.resolve_cost(ledger, request)?;
        self.apply(ledger, request, &cost)
    }

    /// Commits a previously previewed cost.
    ///
    /// Affordability is re-verified against the current balances so a stale
    /// preview cannot overdraw a partition; eligibility is the caller's
    /// responsibility when not going through [`RulesEngine::purchase`].
    pub fn apply(
        &self,
        ledger: &mut Ledger,
        request: &PurchaseRequest,
        cost: &CostResult,
    ) -> Result<PurchaseOutcome, PurchaseError> {
        let shortfalls = shortfalls(ledger, &cost.debits);
        if !shortfalls.is_empty() {
            return Err(PurchaseError::Cost(CostError::InsufficientFunds {
                feature: request.feature.clone(),
                shortfalls,
            }));
        }

        let mut changed = Vec::new();
        let seq = self.commit_rank(
            ledger,
            &request.feature,
            request.rank_delta,
            PurchaseSource::Direct,
            cost.debits.clone(),
            &mut changed,
        )?;

        Ok(PurchaseOutcome {
            seq,
            feature: request.feature.clone(),
            new_rank: ledger.rank_of(&request.feature),
            debits: cost.debits.clone(),
            changed_features: changed,
        })
    }

    /// Appends a rank record and applies ownership effects.
    ///
    /// Shared by direct purchases and slot grants. Grant cascades recurse;
    /// termination is guaranteed by the construction-time grant-cycle check.
    pub(crate) fn commit_rank(
        &self,
        ledger: &mut Ledger,
        feature: &FeatureKey,
        rank_delta: u32,
        source: PurchaseSource,
        debits: Vec<Debit>,
        changed: &mut Vec<FeatureKey>,
    ) -> Result<RecordSeq, DefinitionError> {
        ledger.debit_all(&debits);
        let seq = ledger.push_record(feature.clone(), rank_delta, source, debits);
        changed.push(feature.clone());
        self.activate_if_owned(ledger, feature, changed)?;
        Ok(seq)
    }

    /// Applies one-shot grant effects when a feature has just become owned.
    fn activate_if_owned(
        &self,
        ledger: &mut Ledger,
        feature: &FeatureKey,
        changed: &mut Vec<FeatureKey>,
    ) -> Result<(), DefinitionError> {
        if ledger.rank_of(feature) <= 0 || ledger.is_active(feature) {
            return Ok(());
        }
        let def = self.ruleset.get_feature(feature)?;

        let mut credits = Vec::new();
        let mut capacity = Vec::new();
        for effect in &def.effects {
            match effect {
                Effect::GrantCurrency { currency, amount } => {
                    let currency_def = self.ruleset.get_currency(currency)?;
                    let partition = match currency_def.scope {
                        CurrencyScope::Global => PartitionId::global(currency.clone()),
                        CurrencyScope::Local => PartitionId::local(currency.clone(), feature.clone()),
                    };
                    credits.push(Debit {
                        partition,
                        amount: *amount,
                    });
                }
                Effect::GrantSlot { slot, count } => {
                    capacity.push((slot.clone(), *count));
                }
                Effect::ModifyAttribute { .. } | Effect::GrantFeature { .. } => {}
            }
        }

        ledger.credit_all(&credits);
        for (slot, count) in &capacity {
            ledger.add_granted_capacity(slot, *count);
        }
        ledger.activate(feature.clone(), Activation { credits, capacity });

        // Grant cascades run after the activation entry exists so a diamond
        // in the grant graph cannot apply a feature's effects twice.
        for effect in &def.effects {
            if let Effect::GrantFeature {
                feature: granted,
                ranks,
            } = effect
            {
                let granted_def = self.ruleset.get_feature(granted)?;
                let grant = clamp_grant(granted_def.max_ranks, ledger.rank_of(granted), *ranks);
                if grant > 0 {
                    self.commit_rank(
                        ledger,
                        granted,
                        grant,
                        PurchaseSource::Granted(feature.clone()),
                        Vec::new(),
                        changed,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Ranks that can still be granted under the bound.
fn clamp_grant(bound: RankBound, current: i64, want: u32) -> u32 {
    match bound {
        RankBound::Unbounded => want,
        RankBound::Bounded(max) => {
            let room = i64::from(max) - current;
            if room <= 0 {
                0
            } else {
                want.min(u32::try_from(room).unwrap_or(u32::MAX))
            }
        }
    }
}

/// Partitions that cannot cover their share of the given debits.
pub(crate) fn shortfalls(ledger: &Ledger, debits: &[Debit]) -> Vec<Shortfall> {
    debits
        .iter()
        .filter_map(|debit| {
            let available = ledger.balance(&debit.partition);
            (available < debit.amount).then(|| Shortfall {
                partition: debit.partition.clone(),
                required: debit.amount,
                available,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{
        AttributeDef, CurrencyDef, FeatureDefBuilder, FeatureMatcher, RulesetBuilder, SlotDef,
    };
    use crate::expr::{Expr, Pred};

    pub(crate) fn tempest_ruleset() -> Ruleset {
        RulesetBuilder::new()
            .currency(CurrencyDef::global("skill-points", "Skill Points"))
            .currency(CurrencyDef::local("breed-points", "Breed Points"))
            .attribute(AttributeDef::new("toughness", "Toughness", 0))
            .feature(
                FeatureDefBuilder::new("basic-archery", "Basic Archery")
                    .max_ranks(3)
                    .cost("skill-points", 2)
                    .build(),
            )
            .feature(
                FeatureDefBuilder::new("master-archery", "Master Archery")
                    .requires(Pred::requires_rank("basic-archery", 3))
                    .cost("skill-points", 4)
                    .build(),
            )
            .feature(
                FeatureDefBuilder::new("breed-elf", "Elf")
                    .effect(Effect::GrantCurrency {
                        currency: "breed-points".into(),
                        amount: 3,
                    })
                    .build(),
            )
            .feature(
                FeatureDefBuilder::new("keen-senses", "Keen Senses")
                    .parent("breed-elf")
                    .cost("breed-points", 2)
                    .build(),
            )
            .feature(
                FeatureDefBuilder::new("heavy-armor", "Heavy Armor")
                    .tag("armor")
                    .cost("skill-points", 3)
                    .effect(Effect::ModifyAttribute {
                        attribute: "toughness".into(),
                        amount: Expr::Constant(2),
                    })
                    .build(),
            )
            .feature(
                FeatureDefBuilder::new("light-armor", "Light Armor")
                    .tag("armor")
                    .cost("skill-points", 1)
                    .build(),
            )
            .slot(SlotDef::new(
                "class-bonus",
                "Class Bonus",
                FeatureMatcher::any().with_tag("armor"),
                1,
                crate::defs::CollisionPolicy::Refund,
            ))
            .build()
            .unwrap()
    }

    pub(crate) fn funded_ledger() -> Ledger {
        let mut ledger = Ledger::new();
        ledger.award(PartitionId::global("skill-points"), 10);
        ledger
    }

    #[test]
    fn purchase_commits_record_and_debits() {
        let ruleset = tempest_ruleset();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = funded_ledger();

        let outcome = engine
            .purchase(&mut ledger, &PurchaseRequest::new("basic-archery", 2))
            .unwrap();

        assert_eq!(outcome.new_rank, 2);
        assert_eq!(ledger.balance(&PartitionId::global("skill-points")), 6);
        assert_eq!(ledger.records().len(), 1);
        assert_eq!(ledger.records()[0].source, PurchaseSource::Direct);
    }

    #[test]
    fn pipeline_rejects_before_mutating() {
        let ruleset = tempest_ruleset();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = funded_ledger();
        let before = ledger.clone();

        let err = engine
            .purchase(&mut ledger, &PurchaseRequest::new("master-archery", 1))
            .unwrap_err();

        assert_eq!(err.phase(), PurchasePhase::Eligibility);
        assert_eq!(ledger, before);
    }

    #[test]
    fn stale_preview_cannot_overdraw() {
        let ruleset = tempest_ruleset();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = funded_ledger();

        let request = PurchaseRequest::new("basic-archery", 3);
        let cost = engine.resolve_cost(&ledger, &request).unwrap();

        // Spend the pool out from under the preview.
        engine
            .purchase(&mut ledger, &PurchaseRequest::new("heavy-armor", 1))
            .unwrap();
        ledger.award(PartitionId::global("skill-points"), -3);

        let err = engine.apply(&mut ledger, &request, &cost).unwrap_err();
        assert_eq!(err.phase(), PurchasePhase::Cost);
    }

    #[test]
    fn ownership_effects_apply_once() {
        let ruleset = tempest_ruleset();
        let engine = RulesEngine::new(&ruleset);
        let mut ledger = funded_ledger();

        engine
            .purchase(&mut ledger, &PurchaseRequest::new("breed-elf", 1))
            .unwrap();
        assert_eq!(
            ledger.balance(&PartitionId::local("breed-points", "breed-elf")),
            3
        );
        assert!(ledger.is_active(&"breed-elf".into()));
    }
}
