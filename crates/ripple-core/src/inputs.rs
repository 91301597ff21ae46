//! # Root Input Feed
//!
//! The versioned collection of `(key, value)` pairs that drives every
//! generation, and the diff between two versions of it.
//!
//! Keys are validated on insertion the way every other boundary value is:
//! non-empty, bounded length, bounded value size.

use crate::primitives::{MAX_ROOT_INPUTS, MAX_ROOT_KEY_LENGTH, MAX_ROOT_VALUE_LENGTH};
use crate::types::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Externally observed inputs of the pipeline.
///
/// The version increases by one with every effective mutation, so two
/// snapshots with the same version and origin are identical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootInputs {
    version: u64,
    entries: BTreeMap<String, String>,
}

impl RootInputs {
    /// An empty feed at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a feed from pairs, validating each of them.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self, PipelineError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut inputs = Self::new();
        for (key, value) in pairs {
            inputs.insert(key, value)?;
        }
        Ok(inputs)
    }

    /// Validate a key/value pair without inserting it.
    pub fn validate(key: &str, value: &str) -> Result<(), PipelineError> {
        if key.is_empty() {
            return Err(PipelineError::InvalidInput("empty key".to_string()));
        }
        if key.len() > MAX_ROOT_KEY_LENGTH {
            return Err(PipelineError::InvalidInput(format!(
                "key length {} exceeds maximum {}",
                key.len(),
                MAX_ROOT_KEY_LENGTH
            )));
        }
        if value.len() > MAX_ROOT_VALUE_LENGTH {
            return Err(PipelineError::InvalidInput(format!(
                "value for '{}' is {} bytes, maximum is {}",
                key,
                value.len(),
                MAX_ROOT_VALUE_LENGTH
            )));
        }
        Ok(())
    }

    /// Insert or replace an input.
    ///
    /// Returns `Ok(true)` if the feed changed.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<bool, PipelineError> {
        let key = key.into();
        let value = value.into();
        Self::validate(&key, &value)?;

        if self.entries.get(&key) == Some(&value) {
            return Ok(false);
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= MAX_ROOT_INPUTS {
            return Err(PipelineError::InvalidInput(format!(
                "more than {} root inputs",
                MAX_ROOT_INPUTS
            )));
        }
        self.entries.insert(key, value);
        self.version = self.version.saturating_add(1);
        Ok(true)
    }

    /// Remove an input, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.version = self.version.saturating_add(1);
        }
        removed
    }

    /// Look up an input.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Monotonic version of this feed.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All inputs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether both feeds hold exactly the same pairs (versions ignored).
    #[must_use]
    pub fn same_contents(&self, other: &Self) -> bool {
        self.entries == other.entries
    }

    /// Compute what changed from `previous` to `self`.
    #[must_use]
    pub fn diff(&self, previous: &Self) -> InputDiff {
        let mut diff = InputDiff::default();
        for (key, value) in &self.entries {
            match previous.entries.get(key) {
                None => diff.added.push(key.clone()),
                Some(old) if old != value => diff.modified.push(key.clone()),
                Some(_) => {}
            }
        }
        for key in previous.entries.keys() {
            if !self.entries.contains_key(key) {
                diff.removed.push(key.clone());
            }
        }
        diff
    }
}

/// Keys that changed between two versions of the root inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDiff {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl InputDiff {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Total number of changed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_bumps_version_only_on_change() {
        let mut inputs = RootInputs::new();
        assert!(inputs.insert("a", "1").expect("insert"));
        assert_eq!(inputs.version(), 1);
        assert!(!inputs.insert("a", "1").expect("insert"));
        assert_eq!(inputs.version(), 1);
        assert!(inputs.insert("a", "2").expect("insert"));
        assert_eq!(inputs.version(), 2);
    }

    #[test]
    fn empty_key_rejected() {
        let mut inputs = RootInputs::new();
        let result = inputs.insert("", "x");
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn oversized_key_rejected() {
        let key = "k".repeat(MAX_ROOT_KEY_LENGTH + 1);
        assert!(RootInputs::validate(&key, "v").is_err());
    }

    #[test]
    fn diff_classifies_changes() {
        let before = RootInputs::from_pairs([("a", "1"), ("b", "2"), ("c", "3")]).expect("build");
        let after = RootInputs::from_pairs([("a", "1"), ("b", "20"), ("d", "4")]).expect("build");
        let diff = after.diff(&before);
        assert_eq!(diff.added, vec!["d".to_string()]);
        assert_eq!(diff.modified, vec!["b".to_string()]);
        assert_eq!(diff.removed, vec!["c".to_string()]);
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn same_contents_ignores_version() {
        let mut a = RootInputs::from_pairs([("x", "1")]).expect("build");
        let b = RootInputs::from_pairs([("x", "1")]).expect("build");
        a.insert("y", "2").expect("insert");
        a.remove("y");
        assert_ne!(a.version(), b.version());
        assert!(a.same_contents(&b));
        assert!(a.diff(&b).is_empty());
    }
}
