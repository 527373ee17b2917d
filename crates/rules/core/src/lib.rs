//! Deterministic purchase-resolution core for character sheets.
//!
//! `rules-core` defines the canonical evaluation rules (definitions, ledger,
//! purchase pipeline, attribute compilation) and exposes pure APIs that can be
//! reused by both the session layer and offline tools. All ledger mutation
//! flows through [`engine::RulesEngine`], and supporting crates depend on the
//! types re-exported here.
pub mod attrs;
pub mod defs;
pub mod engine;
pub mod error;
pub mod expr;
pub mod ledger;

pub use attrs::{AttributeCache, compile_all, value_of};
pub use defs::{
    AttributeDef, AttributeKey, CollisionPolicy, CostTable, CurrencyDef, CurrencyKey,
    CurrencyScope, DefinitionError, Effect, FeatureDef, FeatureDefBuilder, FeatureKey,
    FeatureMatcher, RankBound, RankCost, Ruleset, RulesetBuilder, SlotDef, SlotKey,
};
pub use engine::{
    Conflict, CostError, CostResult, Eligibility, EligibilityError, PurchaseError,
    PurchaseOutcome, PurchasePhase, PurchaseRequest, RetractError, RetractOutcome, RulesEngine,
    Shortfall, SlotError, SlotFillResult,
};
pub use error::{CoreError, ErrorSeverity};
pub use expr::{CmpOp, Comparison, EvalContext, EvalError, Expr, Pred, Unmet};
pub use ledger::{
    Activation, Debit, FillOutcome, Ledger, PartitionId, PartitionOwner, PurchaseRecord,
    PurchaseSource, RecordSeq, RefundEntry, SlotFill,
};

#[cfg(feature = "serde")]
pub use ledger::snapshot::{BalanceEntry, LedgerSnapshot};
