//! Feature matching for slot eligibility filters.

use std::collections::BTreeSet;

use crate::defs::{FeatureDef, FeatureKey};

/// Matcher for checking whether a feature can be used in some context,
/// typically a slot filter ("pick any martial skill").
///
/// All configured conditions must hold for a feature to match; a default
/// matcher accepts everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureMatcher {
    /// If set, the feature's key must be in this set.
    pub keys: Option<BTreeSet<FeatureKey>>,
    /// Tags the feature must carry.
    pub tags: BTreeSet<String>,
    /// Tags the feature must not carry.
    pub excluded_tags: BTreeSet<String>,
    /// If set, the feature's parent must equal this key.
    pub parent: Option<FeatureKey>,
}

impl FeatureMatcher {
    /// Matches every feature.
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches only the listed feature keys.
    pub fn keys(keys: impl IntoIterator<Item = FeatureKey>) -> Self {
        Self {
            keys: Some(keys.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn without_tag(mut self, tag: impl Into<String>) -> Self {
        self.excluded_tags.insert(tag.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<FeatureKey>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Does this feature match the matcher?
    pub fn matches(&self, feature: &FeatureDef) -> bool {
        if let Some(keys) = &self.keys {
            if !keys.contains(&feature.key) {
                return false;
            }
        }
        if !self.tags.is_subset(&feature.tags) {
            return false;
        }
        if self
            .excluded_tags
            .iter()
            .any(|tag| feature.tags.contains(tag))
        {
            return false;
        }
        if let Some(parent) = &self.parent {
            if feature.parent.as_ref() != Some(parent) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::FeatureDefBuilder;

    #[test]
    fn default_matches_everything() {
        let def = FeatureDefBuilder::new("anything", "Anything").build();
        assert!(FeatureMatcher::any().matches(&def));
    }

    #[test]
    fn key_set_restricts() {
        let def = FeatureDefBuilder::new("heavy-armor", "Heavy Armor").build();
        let matcher = FeatureMatcher::keys(["heavy-armor".into()]);
        assert!(matcher.matches(&def));

        let other = FeatureDefBuilder::new("light-armor", "Light Armor").build();
        assert!(!matcher.matches(&other));
    }

    #[test]
    fn tags_and_exclusions() {
        let def = FeatureDefBuilder::new("cleave", "Cleave")
            .tag("martial")
            .tag("melee")
            .build();

        assert!(FeatureMatcher::any().with_tag("martial").matches(&def));
        assert!(!FeatureMatcher::any().with_tag("arcane").matches(&def));
        assert!(!FeatureMatcher::any().without_tag("melee").matches(&def));
    }

    #[test]
    fn parent_must_match_exactly() {
        let def = FeatureDefBuilder::new("night-vision", "Night Vision")
            .parent("breed-elf")
            .build();

        assert!(FeatureMatcher::any().with_parent("breed-elf").matches(&def));
        assert!(!FeatureMatcher::any().with_parent("breed-dwarf").matches(&def));

        let orphan = FeatureDefBuilder::new("stray", "Stray").build();
        assert!(!FeatureMatcher::any().with_parent("breed-elf").matches(&orphan));
    }
}
