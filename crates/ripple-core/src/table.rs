//! # State Tables
//!
//! Per-stage ordered tables of [`Entry`] values and the reconciliation that
//! turns a freshly produced candidate table into the next generation's table.
//!
//! ## Reconciliation
//!
//! Given the previous table and the entries produced this generation:
//! - a key absent from the previous table is `Added`
//! - a key present in both is `Cached` when the stage comparer reports
//!   equality (the previous `Arc` is reused) and `Modified` otherwise
//! - a key of the previous table that was not produced again becomes a
//!   `Removed` tombstone, kept for exactly one generation
//!
//! Tombstones of the previous table are never carried forward.

use crate::comparer::{Comparer, Comparison, compare_guarded};
use crate::types::{Diagnostic, DiagnosticKind, EntryKey, EntryState, Severity, Upstream};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// ENTRY
// =============================================================================

/// A single versioned value flowing along a graph edge.
pub struct Entry<T> {
    key: EntryKey,
    origin: EntryKey,
    value: Arc<T>,
    state: EntryState,
    elapsed: Duration,
    provenance: Arc<[Upstream]>,
    roots: Arc<[Arc<str>]>,
}

impl<T> Entry<T> {
    /// Stable identity of this entry across generations.
    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    /// Key of the upstream entry whose transform produced this entry.
    pub fn origin(&self) -> &EntryKey {
        &self.origin
    }

    /// The current value, or `None` for a `Removed` tombstone.
    pub fn value(&self) -> Option<&T> {
        match self.state {
            EntryState::Removed => None,
            _ => Some(&self.value),
        }
    }

    /// The value this entry carried when it was last live.
    ///
    /// For tombstones this is the retracted value.
    pub fn last_value(&self) -> &T {
        &self.value
    }

    /// Shared handle to the value, used to check reuse across generations.
    pub fn value_arc(&self) -> &Arc<T> {
        &self.value
    }

    /// Lifecycle state relative to the previous generation.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Time spent producing this entry (zero for cached and removed entries).
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Upstream entries this entry was derived from.
    pub fn provenance(&self) -> &[Upstream] {
        &self.provenance
    }

    /// Root input keys this entry descends from.
    pub fn roots(&self) -> &[Arc<str>] {
        &self.roots
    }

    /// Whether this entry is a tombstone.
    pub fn is_removed(&self) -> bool {
        self.state == EntryState::Removed
    }

    fn with_state(&self, state: EntryState) -> Self {
        Self {
            key: self.key.clone(),
            origin: self.origin.clone(),
            value: Arc::clone(&self.value),
            state,
            elapsed: Duration::ZERO,
            provenance: Arc::clone(&self.provenance),
            roots: Arc::clone(&self.roots),
        }
    }
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            origin: self.origin.clone(),
            value: Arc::clone(&self.value),
            state: self.state,
            elapsed: self.elapsed,
            provenance: Arc::clone(&self.provenance),
            roots: Arc::clone(&self.roots),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("state", &self.state)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

// =============================================================================
// FAULTS
// =============================================================================

/// A transform fault recorded at the position of one input entry.
///
/// Downstream stages see the position as absent. The fault is carried to the
/// next generation for as long as its input stays cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Key of the input entry whose transform failed.
    pub origin: EntryKey,
    /// The diagnostic describing the failure.
    pub diagnostic: Diagnostic,
}

// =============================================================================
// STATE TABLE
// =============================================================================

/// The ordered entries a stage produced in one generation.
pub struct StateTable<T> {
    entries: Vec<Entry<T>>,
    faults: Vec<Fault>,
    index: BTreeMap<EntryKey, usize>,
}

impl<T> StateTable<T> {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            faults: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    /// All entries in table order, tombstones included.
    pub fn entries(&self) -> &[Entry<T>] {
        &self.entries
    }

    /// Entries that carry a value in this generation.
    pub fn live(&self) -> impl Iterator<Item = &Entry<T>> {
        self.entries.iter().filter(|e| !e.is_removed())
    }

    /// Values of all live entries, in table order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.live().map(|e| e.value.as_ref())
    }

    /// States of all entries, in table order.
    pub fn states(&self) -> Vec<EntryState> {
        self.entries.iter().map(Entry::state).collect()
    }

    /// Look up a live entry by key.
    pub fn get(&self, key: &EntryKey) -> Option<&Entry<T>> {
        self.index.get(key).and_then(|&i| self.entries.get(i))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the table has no live entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Faults recorded for input positions of this stage.
    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    /// Whether any entry is added, modified or removed.
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.state.is_changed())
    }

    /// Live entries grouped by the upstream key that produced them, in table order.
    pub(crate) fn groups(&self) -> BTreeMap<&EntryKey, Vec<&Entry<T>>> {
        let mut groups: BTreeMap<&EntryKey, Vec<&Entry<T>>> = BTreeMap::new();
        for entry in self.live() {
            groups.entry(&entry.origin).or_default().push(entry);
        }
        groups
    }

    /// Faults keyed by the input position they belong to.
    pub(crate) fn faults_by_origin(&self) -> BTreeMap<&EntryKey, Vec<&Fault>> {
        let mut faults: BTreeMap<&EntryKey, Vec<&Fault>> = BTreeMap::new();
        for fault in &self.faults {
            faults.entry(&fault.origin).or_default().push(fault);
        }
        faults
    }

    /// This table as seen by a generation in which nothing upstream changed:
    /// tombstones dropped, every entry `Cached`, values shared.
    pub(crate) fn project_cached(&self) -> Self {
        let entries: Vec<Entry<T>> = self
            .live()
            .map(|e| e.with_state(EntryState::Cached))
            .collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.clone(), i))
            .collect();
        Self {
            entries,
            faults: self.faults.clone(),
            index,
        }
    }

    fn is_settled(&self) -> bool {
        self.entries.iter().all(|e| e.state == EntryState::Cached)
    }
}

impl<T> Default for StateTable<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: fmt::Debug> fmt::Debug for StateTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTable")
            .field("entries", &self.entries)
            .field("faults", &self.faults)
            .finish()
    }
}

// =============================================================================
// TYPE-ERASED TABLE
// =============================================================================

/// Per-state entry counts of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub added: usize,
    pub modified: usize,
    pub cached: usize,
    pub removed: usize,
}

/// Type-erased view of a [`StateTable`], used by the driver loop.
pub(crate) trait AnyTable: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn has_changes(&self) -> bool;
    fn counts(&self) -> StateCounts;
    fn fault_list(&self) -> &[Fault];
    /// Reuse this table for a generation in which the stage is skipped.
    fn cached_projection(self: Arc<Self>) -> Arc<dyn AnyTable>;
}

impl<T: Send + Sync + 'static> AnyTable for StateTable<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn has_changes(&self) -> bool {
        StateTable::has_changes(self)
    }

    fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for entry in &self.entries {
            match entry.state {
                EntryState::Added => counts.added += 1,
                EntryState::Modified => counts.modified += 1,
                EntryState::Cached => counts.cached += 1,
                EntryState::Removed => counts.removed += 1,
            }
        }
        counts
    }

    fn fault_list(&self) -> &[Fault] {
        &self.faults
    }

    fn cached_projection(self: Arc<Self>) -> Arc<dyn AnyTable> {
        if self.is_settled() {
            // Already all-cached with no tombstones: share the same table.
            self
        } else {
            Arc::new(self.project_cached())
        }
    }
}

/// Borrow a typed table out of an erased one.
pub(crate) fn downcast<T: 'static>(table: &dyn AnyTable) -> Option<&StateTable<T>> {
    table.as_any().downcast_ref::<StateTable<T>>()
}

// =============================================================================
// TABLE BUILDER
// =============================================================================

/// Accumulates one generation's entries for a stage and reconciles them
/// against the previous generation's table.
pub(crate) struct TableBuilder<'a, T> {
    stage: &'a str,
    previous: Option<&'a StateTable<T>>,
    comparer: &'a dyn Comparer<T>,
    entries: Vec<Entry<T>>,
    index: BTreeMap<EntryKey, usize>,
    faults: Vec<Fault>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a, T> TableBuilder<'a, T> {
    pub(crate) fn new(
        stage: &'a str,
        previous: Option<&'a StateTable<T>>,
        comparer: &'a dyn Comparer<T>,
    ) -> Self {
        Self {
            stage,
            previous,
            comparer,
            entries: Vec::new(),
            index: BTreeMap::new(),
            faults: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Number of live entries added so far.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Add a freshly computed value and classify it against the previous table.
    pub(crate) fn add_computed(
        &mut self,
        key: EntryKey,
        origin: EntryKey,
        value: T,
        elapsed: Duration,
        provenance: Arc<[Upstream]>,
        roots: Arc<[Arc<str>]>,
    ) -> EntryState {
        let previous = self.previous.and_then(|p| p.get(&key));
        let (value, state) = match previous {
            None => (Arc::new(value), EntryState::Added),
            Some(prev) => match compare_guarded(self.comparer, &prev.value, &value) {
                Comparison::Equal => (Arc::clone(&prev.value), EntryState::Cached),
                Comparison::NotEqual => (Arc::new(value), EntryState::Modified),
                Comparison::Faulted(message) => {
                    tracing::warn!(stage = self.stage, key = %key, "Comparer fault: {}", message);
                    self.diagnostics.push(Diagnostic::new(
                        Severity::Warning,
                        DiagnosticKind::ComparerFault,
                        self.stage,
                        &roots,
                        format!("comparer failed for '{key}': {message}"),
                    ));
                    (Arc::new(value), EntryState::Modified)
                }
            },
        };
        let elapsed = if state == EntryState::Cached {
            Duration::ZERO
        } else {
            elapsed
        };
        self.push(Entry {
            key,
            origin,
            value,
            state,
            elapsed,
            provenance,
            roots,
        });
        state
    }

    /// Carry a previous entry forward without re-running its transform.
    pub(crate) fn add_projected(&mut self, previous: &Entry<T>, provenance: Arc<[Upstream]>) {
        let mut entry = previous.with_state(EntryState::Cached);
        entry.provenance = provenance;
        self.push(entry);
    }

    /// Record a transform fault for one input position.
    pub(crate) fn add_fault(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    fn push(&mut self, entry: Entry<T>) {
        debug_assert!(
            !self.index.contains_key(&entry.key),
            "duplicate entry key in one stage table"
        );
        self.index.insert(entry.key.clone(), self.entries.len());
        self.entries.push(entry);
    }

    /// Freeze the builder into the reconciled table.
    ///
    /// Returns the table and the comparer diagnostics raised while building it.
    pub(crate) fn finish(mut self) -> (StateTable<T>, Vec<Diagnostic>) {
        if let Some(previous) = self.previous {
            let tombstones: Vec<Entry<T>> = previous
                .live()
                .filter(|e| !self.index.contains_key(&e.key))
                .map(|e| e.with_state(EntryState::Removed))
                .collect();
            // Tombstones are not indexed: lookups only see live entries.
            self.entries.extend(tombstones);
        }
        let table = StateTable {
            entries: self.entries,
            faults: self.faults,
            index: self.index,
        };
        (table, self.diagnostics)
    }
}

// =============================================================================
// TESTS
// =============================================================================
