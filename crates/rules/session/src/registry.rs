//! Registry of live character sessions.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use rules_core::{Ledger, Ruleset};

use crate::handle::CharacterHandle;
use crate::worker::CharacterWorker;

const COMMAND_BUFFER: usize = 32;

/// Identifies one character record, typically matching a database key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CharacterId(String);

impl CharacterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CharacterId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Spawns and tracks one worker task per character.
///
/// The definition model is loaded once and shared read-only across every
/// session; ledgers are owned by their workers and never shared.
pub struct SessionRegistry {
    ruleset: Arc<Ruleset>,
    sessions: Mutex<HashMap<CharacterId, CharacterHandle>>,
}

impl SessionRegistry {
    pub fn new(ruleset: Arc<Ruleset>) -> Self {
        Self {
            ruleset,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn ruleset(&self) -> &Arc<Ruleset> {
        &self.ruleset
    }

    /// Spawns a session owning the given ledger and returns its handle.
    ///
    /// A session already registered under this id is replaced; its worker
    /// exits once the old handles are dropped.
    pub fn spawn(&self, character: CharacterId, ledger: Ledger) -> CharacterHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = CharacterWorker::new(
            character.clone(),
            Arc::clone(&self.ruleset),
            ledger,
            command_rx,
        );
        tokio::spawn(worker.run());

        let handle = CharacterHandle::new(character.clone(), command_tx);
        self.lock_sessions().insert(character, handle.clone());
        handle
    }

    pub fn get(&self, character: &CharacterId) -> Option<CharacterHandle> {
        self.lock_sessions().get(character).cloned()
    }

    /// Drops the registry's handle. The worker exits once every outstanding
    /// clone is dropped.
    pub fn remove(&self, character: &CharacterId) -> Option<CharacterHandle> {
        self.lock_sessions().remove(character)
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<CharacterId, CharacterHandle>> {
        // Worker panics cannot corrupt the map; recover from poisoning.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rules_core::{
        CurrencyDef, FeatureDefBuilder, PartitionId, PurchaseRequest, RulesetBuilder,
    };

    use crate::error::SessionError;

    fn test_ruleset() -> Arc<Ruleset> {
        Arc::new(
            RulesetBuilder::new()
                .currency(CurrencyDef::global("sp", "Skill Points"))
                .feature(
                    FeatureDefBuilder::new("shield-wall", "Shield Wall")
                        .max_ranks(10)
                        .cost("sp", 2)
                        .build(),
                )
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn concurrent_purchases_cannot_double_spend() {
        let registry = SessionRegistry::new(test_ruleset());
        let mut ledger = Ledger::new();
        ledger.award(PartitionId::global("sp"), 5);
        let handle = registry.spawn("char-1".into(), ledger);

        // Five concurrent buyers against a pool that covers only two.
        let mut tasks = Vec::new();
        for _ in 0..5 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.purchase(PurchaseRequest::new("shield-wall", 1)).await
            }));
        }

        let mut committed = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                committed += 1;
            }
        }

        assert_eq!(committed, 2);
        let snapshot = handle.snapshot().await.unwrap();
        let spent: i64 = snapshot
            .records
            .iter()
            .flat_map(|record| record.debits.iter())
            .map(|debit| debit.amount)
            .sum();
        assert_eq!(spent, 4);
    }

    #[tokio::test]
    async fn rejections_are_structured_while_alive() {
        let registry = SessionRegistry::new(test_ruleset());
        let handle = registry.spawn("char-2".into(), Ledger::new());

        // No funds: the purchase is rejected with a structured core error,
        // not a transport failure.
        let err = handle
            .purchase(PurchaseRequest::new("shield-wall", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Purchase(_)));

        registry.remove(&"char-2".into());
        assert!(registry.get(&"char-2".into()).is_none());
    }

    #[tokio::test]
    async fn dead_worker_reports_closed() {
        let (command_tx, command_rx) = mpsc::channel(1);
        drop(command_rx);
        let handle = CharacterHandle::new("ghost".into(), command_tx);

        let result = handle.snapshot().await;
        assert!(matches!(result, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn snapshot_survives_the_persistence_boundary() {
        let ruleset = test_ruleset();
        let registry = SessionRegistry::new(Arc::clone(&ruleset));
        let mut ledger = Ledger::new();
        ledger.award(PartitionId::global("sp"), 6);
        let handle = registry.spawn("char-4".into(), ledger);

        handle
            .purchase(PurchaseRequest::new("shield-wall", 2))
            .await
            .unwrap();

        // Store and restore verbatim, as a persistence layer would.
        let snapshot = handle.snapshot().await.unwrap();
        let stored = serde_json::to_string(&snapshot).unwrap();
        let restored: rules_core::LedgerSnapshot = serde_json::from_str(&stored).unwrap();
        assert_eq!(snapshot.digest().unwrap(), restored.digest().unwrap());

        let revived = registry.spawn("char-4".into(), Ledger::restore(restored));
        let eligibility = revived.can_purchase("shield-wall", 1).await.unwrap();
        assert_eq!(eligibility.current_rank, 2);
    }

    #[tokio::test]
    async fn award_then_value_flow() {
        let ruleset = Arc::new(
            RulesetBuilder::new()
                .currency(CurrencyDef::global("sp", "Skill Points"))
                .attribute(rules_core::AttributeDef::new("grit", "Grit", 1))
                .feature(
                    FeatureDefBuilder::new("tough", "Tough")
                        .cost("sp", 1)
                        .effect(rules_core::Effect::ModifyAttribute {
                            attribute: "grit".into(),
                            amount: rules_core::Expr::Constant(2),
                        })
                        .build(),
                )
                .build()
                .unwrap(),
        );
        let registry = SessionRegistry::new(ruleset);
        let handle = registry.spawn("char-3".into(), Ledger::new());

        assert_eq!(handle.value_of("grit").await.unwrap(), 1);

        handle.award(PartitionId::global("sp"), 3).await.unwrap();
        handle
            .purchase(PurchaseRequest::new("tough", 1))
            .await
            .unwrap();
        assert_eq!(handle.value_of("grit").await.unwrap(), 3);
    }
}
