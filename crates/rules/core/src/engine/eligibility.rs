//! Eligibility gate: is this purchase legal, affordability aside?

use crate::defs::FeatureKey;
use crate::engine::{Eligibility, EligibilityError, RulesEngine};
use crate::expr::{EvalContext, check_pred};
use crate::ledger::Ledger;

impl RulesEngine<'_> {
    /// Pure query: may the character change this feature by `rank_delta`?
    ///
    /// Prerequisites are evaluated at the target rank against current ledger
    /// state, and every unmet check is collected so the caller can present
    /// all blockers at once. Affordability is deliberately not checked here:
    /// "not allowed" and "can't afford" are distinct answers.
    ///
    /// A negative delta validates the sellback direction (rank bounds only);
    /// dependent-prerequisite checks for removals live in the retraction
    /// path, which sees the full post-removal state.
    pub fn can_purchase(
        &self,
        ledger: &Ledger,
        feature: &FeatureKey,
        rank_delta: i32,
    ) -> Result<Eligibility, EligibilityError> {
        let def = self.ruleset().get_feature(feature)?;
        let current = ledger.rank_of(feature);
        let target = current + i64::from(rank_delta);

        if target < 0 || !def.max_ranks.allows(target) {
            return Err(EligibilityError::RankOutOfBounds {
                feature: feature.clone(),
                target,
                max: def.max_ranks,
            });
        }

        if rank_delta > 0 {
            let ctx = EvalContext::new(self.ruleset(), ledger)
                .with_rank_override(feature.clone(), target);
            let unmet = check_pred(&def.requires, &ctx)?;
            if !unmet.is_empty() {
                return Err(EligibilityError::PrerequisiteNotMet {
                    feature: feature.clone(),
                    unmet,
                });
            }
        }

        Ok(Eligibility {
            feature: feature.clone(),
            current_rank: current,
            target_rank: target,
        })
    }
}
