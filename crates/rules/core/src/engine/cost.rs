//! Cost gate: what would this purchase debit, and can the pools cover it?

use std::collections::BTreeMap;

use crate::defs::CurrencyScope;
use crate::engine::{CostError, CostResult, PurchaseRequest, RulesEngine, shortfalls};
use crate::ledger::{Debit, Ledger, PartitionId};

impl RulesEngine<'_> {
    /// Computes the exact debits the purchase would apply. Side-effect free.
    ///
    /// Per-rank costs are summed over the purchased rank range, so non-linear
    /// curves charge each rank at its own price. Local currencies resolve
    /// their partition from the request's `under` context, falling back to
    /// the feature's defined parent. All under-funded partitions are
    /// reported together.
    pub fn resolve_cost(
        &self,
        ledger: &Ledger,
        request: &PurchaseRequest,
    ) -> Result<CostResult, CostError> {
        let def = self.ruleset().get_feature(&request.feature)?;
        let current = u32::try_from(ledger.rank_of(&request.feature)).unwrap_or(0);

        let mut totals: BTreeMap<PartitionId, i64> = BTreeMap::new();
        for cost in &def.costs {
            let currency = cost.currency();
            let currency_def = self.ruleset().get_currency(currency)?;
            let partition = match currency_def.scope {
                CurrencyScope::Global => PartitionId::global(currency.clone()),
                CurrencyScope::Local => {
                    let owner = request
                        .under
                        .clone()
                        .or_else(|| def.parent.clone())
                        .ok_or_else(|| CostError::NoPartition {
                            feature: request.feature.clone(),
                            currency: currency.clone(),
                        })?;
                    PartitionId::local(currency.clone(), owner)
                }
            };

            let mut amount = 0i64;
            for rank in (current + 1)..=(current + request.rank_delta) {
                amount += cost.per_rank(rank);
            }
            if amount != 0 {
                *totals.entry(partition).or_insert(0) += amount;
            }
        }

        let debits: Vec<Debit> = totals
            .into_iter()
            .map(|(partition, amount)| Debit { partition, amount })
            .collect();

        let shortfalls = shortfalls(ledger, &debits);
        if !shortfalls.is_empty() {
            return Err(CostError::InsufficientFunds {
                feature: request.feature.clone(),
                shortfalls,
            });
        }

        Ok(CostResult {
            feature: request.feature.clone(),
            rank_delta: request.rank_delta,
            debits,
        })
    }
}
