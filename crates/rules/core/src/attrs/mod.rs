//! Attribute compilation.
//!
//! Attributes are pure functions of ledger state: a base formula (or default)
//! plus the modifiers attached to owned features, evaluated strictly in the
//! dependency order stored on the ruleset. Cycle impossibility is guaranteed
//! by the construction-time check, so compilation never recurses unboundedly.
//!
//! Two modes are offered with identical results:
//! - eager: [`compile_all`] / [`value_of`] recompute from scratch on demand
//! - lazy: [`AttributeCache`] keeps resolved values and recomputes only
//!   transitively-dependent attributes when told what changed
mod cache;
mod compile;

pub use cache::AttributeCache;
pub use compile::{compile_all, value_of};
