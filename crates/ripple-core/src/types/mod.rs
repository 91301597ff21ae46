//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the engine:
//! - Stage and entry identifiers (`StageId`, `EntryKey`, `Upstream`)
//! - Entry lifecycle (`EntryState`)
//! - Diagnostics with provenance (`Diagnostic`, `Severity`, `DiagnosticKind`)
//! - Host output records (`HostOutput`)
//! - Error types (`PipelineError`)
//!
//! ## Determinism Guarantees
//!
//! All identifier types implement `Ord` so that every lookup structure in the
//! engine can be a `BTreeMap`/`BTreeSet` and iteration order never depends on
//! hashing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// STAGE IDENTIFIERS
// =============================================================================

/// Index of a stage inside a frozen pipeline.
///
/// Stage ids are assigned in registration order, so an upstream stage always
/// has a smaller id than the stages that read from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageId(pub u32);

impl StageId {
    /// Position of this stage in the pipeline's stage vector.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reference to one entry of an upstream table.
///
/// Recorded on every produced entry so a value can be traced back through
/// the graph to the root inputs it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Upstream {
    /// The upstream stage.
    pub stage: StageId,
    /// Index of the entry inside that stage's table for the same generation.
    pub index: usize,
}

// =============================================================================
// ENTRY KEY
// =============================================================================

/// One segment of an [`EntryKey`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    /// A root input key.
    Root(Arc<str>),
    /// The n-th output a transform emitted for one input.
    Index(u32),
    /// The single position of a fan-in table.
    Unit,
}

/// Stable identity of an entry across generations.
///
/// Tables are reconciled by key, not by array index: a source entry is keyed
/// by its root input key, a 1:1 transform keeps its input's key, a fan-out
/// appends the output's ordinal, and a fan-in collapses to [`KeyPart::Unit`].
/// Inserting or removing an unrelated root therefore never shifts the
/// identity of other entries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey(Arc<[KeyPart]>);

impl EntryKey {
    /// Key of a source entry.
    #[must_use]
    pub fn root(key: &str) -> Self {
        Self(Arc::from(vec![KeyPart::Root(Arc::from(key))]))
    }

    /// Key of the single entry of a fan-in table.
    #[must_use]
    pub fn unit() -> Self {
        Self(Arc::from(vec![KeyPart::Unit]))
    }

    /// Key of the `index`-th output produced from this key.
    #[must_use]
    pub fn child(&self, index: u32) -> Self {
        let mut parts = self.0.to_vec();
        parts.push(KeyPart::Index(index));
        Self(Arc::from(parts))
    }

    /// All segments, outermost first.
    #[must_use]
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// The root input key this entry descends from, if it has a single one.
    #[must_use]
    pub fn root_key(&self) -> Option<&str> {
        self.0.iter().find_map(|part| match part {
            KeyPart::Root(key) => Some(key.as_ref()),
            _ => None,
        })
    }
}

/// Root keys are written verbatim except that `\` and `#` are escaped with a
/// backslash; every index is written as `#n` and the fan-in unit as `#`.
/// Distinct keys therefore always render differently: `a/1` is a root,
/// `a#1` is the second output produced from root `a`.
impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in self.0.iter() {
            match part {
                KeyPart::Root(key) => {
                    for c in key.chars() {
                        if matches!(c, '\\' | '#') {
                            f.write_str("\\")?;
                        }
                        write!(f, "{c}")?;
                    }
                }
                KeyPart::Index(index) => write!(f, "#{index}")?,
                KeyPart::Unit => f.write_str("#")?,
            }
        }
        Ok(())
    }
}

// =============================================================================
// ENTRY STATE
// =============================================================================

/// Lifecycle state of an entry relative to the previous generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryState {
    /// No entry with this key existed in the previous generation.
    Added,
    /// The key existed but the comparer reported a different value.
    Modified,
    /// The key existed and the value is unchanged (shared with the previous generation).
    Cached,
    /// Tombstone: the key existed in the previous generation and is gone now.
    Removed,
}

impl EntryState {
    /// Whether downstream stages must treat this position as changed.
    #[must_use]
    pub const fn is_changed(self) -> bool {
        !matches!(self, Self::Cached)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Cached => "cached",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Where a diagnostic came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A transform failed (returned an error or panicked) for one input entry.
    TransformFault,
    /// A comparer panicked; the entry was conservatively treated as modified.
    ComparerFault,
    /// Two host outputs used the same key in one generation.
    DuplicateOutputKey,
    /// Reported by a diagnostic output stage.
    Reported,
}

/// A structured diagnostic with source provenance.
///
/// `stage` names the stage that produced it and `roots` lists the root input
/// keys its triggering entry descends from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub stage: String,
    pub roots: Vec<String>,
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic attributed to `stage` and the given root keys.
    #[must_use]
    pub fn new(
        severity: Severity,
        kind: DiagnosticKind,
        stage: impl Into<String>,
        roots: &[Arc<str>],
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            kind,
            stage: stage.into(),
            roots: roots.iter().map(|r| r.to_string()).collect(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} [{}]", self.severity, self.stage)?;
        if !self.roots.is_empty() {
            write!(f, " ({})", self.roots.join(", "))?;
        }
        write!(f, ": {}", self.message)
    }
}

// =============================================================================
// HOST OUTPUT
// =============================================================================

/// One externally observed `(key, value)` artifact produced by a host output stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostOutput {
    pub key: String,
    pub value: String,
}

impl HostOutput {
    /// Create a new host output.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that escape the engine to its caller.
///
/// Only topology faults, catastrophic resource faults and boundary errors
/// appear here. Transform and comparer faults stay local to their entry and
/// are reported as [`Diagnostic`]s instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The stage graph contains a cycle.
    #[error("Cycle detected among stages: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A stage refers to an upstream that does not exist.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// A handle created by another graph builder was passed to this one.
    #[error("Stage '{0}' uses a handle from a different graph")]
    ForeignHandle(String),

    /// Two stages were registered under the same name.
    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    /// A stage name is empty or too long.
    #[error("Invalid stage name: {0:?}")]
    InvalidStageName(String),

    /// A root input key or value was rejected.
    #[error("Invalid root input: {0}")]
    InvalidInput(String),

    /// A stage produced more entries than the configured ceiling.
    #[error("Stage '{stage}' exceeded the table limit of {limit} entries")]
    ResourceExhausted { stage: String, limit: usize },

    /// A transform reported a fatal fault; the generation was discarded.
    #[error("Generation aborted in stage '{stage}': {message}")]
    GenerationAborted { stage: String, message: String },

    /// The pipeline definition is malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_keys_extend_parent() {
        let root = EntryKey::root("a.txt");
        let child = root.child(2);
        assert_eq!(child.parts().len(), 2);
        assert_eq!(child.root_key(), Some("a.txt"));
        assert_eq!(child.to_string(), "a.txt#2");
    }

    #[test]
    fn root_with_separator_differs_from_child() {
        let nested = EntryKey::root("a/1");
        let child = EntryKey::root("a").child(1);
        assert_eq!(nested.to_string(), "a/1");
        assert_eq!(child.to_string(), "a#1");
        assert_eq!(EntryKey::root("a#1").to_string(), "a\\#1");
        assert_eq!(EntryKey::root("#").to_string(), "\\#");
        assert_ne!(EntryKey::root("#").to_string(), EntryKey::unit().to_string());
    }

    #[test]
    fn keys_order_by_root_then_index() {
        let a0 = EntryKey::root("a").child(0);
        let a1 = EntryKey::root("a").child(1);
        let b0 = EntryKey::root("b").child(0);
        assert!(a0 < a1);
        assert!(a1 < b0);
    }

    #[test]
    fn unit_key_has_no_root() {
        assert_eq!(EntryKey::unit().root_key(), None);
        assert_eq!(EntryKey::unit().to_string(), "#");
    }

    #[test]
    fn only_cached_is_unchanged() {
        assert!(EntryState::Added.is_changed());
        assert!(EntryState::Modified.is_changed());
        assert!(EntryState::Removed.is_changed());
        assert!(!EntryState::Cached.is_changed());
    }

    #[test]
    fn diagnostic_display_includes_provenance() {
        let diag = Diagnostic::new(
            Severity::Warning,
            DiagnosticKind::TransformFault,
            "upper",
            &[Arc::from("a.txt")],
            "boom",
        );
        assert_eq!(diag.to_string(), "Warning [upper] (a.txt): boom");
    }
}
