//! # ripple-core
//!
//! The incremental dataflow engine of Ripple.
//!
//! A host builds a typed stage graph once, freezes it into a [`Pipeline`]
//! and hands it to a [`Driver`]. Every call to
//! [`Driver::run_generation`] feeds a new version of the root inputs through
//! the graph. Each stage reconciles its freshly produced entries against its
//! previous table, so every entry is reported as `Added`, `Modified`,
//! `Cached` or `Removed`, and stages whose inputs are all cached are skipped.
//!
//! ## Architectural Constraints
//!
//! - No async and no network dependencies (pure Rust)
//! - Deterministic: ordered maps only, output order follows topology and table order
//! - Faults stay local: a failing transform or comparer costs one entry, not the generation
//! - Atomic commit: a cancelled or aborted generation leaves the previous one visible

// =============================================================================
// MODULES
// =============================================================================

pub mod comparer;
pub mod context;
pub mod driver;
pub mod export;
pub mod graph;
pub mod inputs;
pub mod primitives;
pub mod stage;
pub mod table;
pub mod topology;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    Diagnostic, DiagnosticKind, EntryKey, EntryState, HostOutput, KeyPart, PipelineError,
    Severity, StageId, Upstream,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use comparer::{Comparer, DefaultComparer, FnComparer, comparer_fn};
pub use context::{CancellationToken, ProductionContext, TransformError};
pub use driver::{
    Driver, DriverOptions, GenerationOutcome, GenerationReport, SinkOutputs, StageRunSummary,
};
pub use graph::{GraphBuilder, Pipeline, Provider, StageOptions, Value, Values};
pub use inputs::{InputDiff, RootInputs};
pub use stage::StageKind;
pub use table::{Entry, Fault, StateCounts, StateTable};

// =============================================================================
// RE-EXPORTS: Export
// =============================================================================

#[cfg(feature = "crypto-hash")]
pub use export::snapshot_crypto_hash;
pub use export::{
    SNAPSHOT_MAGIC, Snapshot, SnapshotHeader, SnapshotStage, export_snapshot, import_snapshot,
    snapshot_checksum,
};
