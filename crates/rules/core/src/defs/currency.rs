//! Currency definitions: spendable resources with global or local scope.

use crate::defs::CurrencyKey;

/// Scope of a currency's pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CurrencyScope {
    /// One pool per character.
    Global,

    /// One pool per owning parent-feature instance (a partition). A
    /// partition's balance is never visible to or spendable against another
    /// partition of the same currency.
    Local,
}

/// Immutable description of a currency.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CurrencyDef {
    pub key: CurrencyKey,
    pub name: String,
    pub scope: CurrencyScope,
}

impl CurrencyDef {
    pub fn global(key: impl Into<CurrencyKey>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            scope: CurrencyScope::Global,
        }
    }

    pub fn local(key: impl Into<CurrencyKey>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            scope: CurrencyScope::Local,
        }
    }
}
