//! Slot definitions: non-currency grants from a constrained option set.

use crate::defs::{FeatureMatcher, SlotKey};

/// Behavior when the chosen feature is already owned outside the slot.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CollisionPolicy {
    /// Mark the slot filled, consume nothing, grant nothing further.
    #[default]
    NoOp,

    /// Return the original purchase's cost to its exact partitions and
    /// attribute the feature to the slot instead. Net rank unchanged.
    Refund,

    /// The caller must supply an alternate feature meeting the filter. What
    /// counts as an equivalent feature is ruleset-specific, so it is a
    /// required parameter rather than resolved internally.
    Substitute,
}

/// Immutable description of a slot.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotDef {
    pub key: SlotKey,
    pub name: String,
    /// Which features may fill this slot.
    pub filter: FeatureMatcher,
    /// Base fill capacity. Feature effects can grant additional capacity per
    /// character.
    pub cardinality: u32,
    pub policy: CollisionPolicy,
}

impl SlotDef {
    pub fn new(
        key: impl Into<SlotKey>,
        name: impl Into<String>,
        filter: FeatureMatcher,
        cardinality: u32,
        policy: CollisionPolicy,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            filter,
            cardinality,
            policy,
        }
    }
}
