//! # Stages
//!
//! The nodes of the dataflow graph.
//!
//! Every stage kind is generic over its input and output types; the driver
//! only sees the type-erased [`StageNode`] trait, which exposes a single
//! `evaluate` operation producing the stage's next table.

mod collect;
mod combine;
mod post_init;
mod source;
mod transform;

pub(crate) use collect::CollectStage;
pub(crate) use combine::CombineStage;
pub(crate) use post_init::PostInitStage;
pub(crate) use source::SourceStage;
pub(crate) use transform::{Keying, TransformFn, TransformStage};

use crate::context::CancellationToken;
use crate::inputs::RootInputs;
use crate::table::{AnyTable, StateTable, downcast};
use crate::types::{Diagnostic, StageId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// STAGE KIND
// =============================================================================

/// What a stage does, as reported in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Exposes the root input feed.
    Source,
    /// Per-entry transform (select, filter, fan-out).
    Transform,
    /// Fan-in of a whole table into one value.
    Collect,
    /// Pairs each entry with a single value.
    Combine,
    /// Terminal stage producing host outputs.
    HostOutput,
    /// Terminal stage producing diagnostics.
    DiagnosticOutput,
    /// Constant host outputs registered at construction.
    PostInit,
}

impl StageKind {
    /// Whether the stage's table is part of the externally observed output.
    #[must_use]
    pub const fn is_sink(self) -> bool {
        matches!(
            self,
            Self::HostOutput | Self::DiagnosticOutput | Self::PostInit
        )
    }
}

// =============================================================================
// ERASED STAGE
// =============================================================================

/// Everything a stage may read while producing its next table.
pub(crate) struct Evaluation<'a> {
    /// Upstream tables of the current generation, in `upstreams()` order.
    pub(crate) inputs: &'a [Arc<dyn AnyTable>],
    /// This stage's table from the last completed generation.
    pub(crate) previous: Option<&'a dyn AnyTable>,
    pub(crate) roots: &'a RootInputs,
    pub(crate) token: &'a CancellationToken,
    pub(crate) max_entries: usize,
}

impl Evaluation<'_> {
    /// The `slot`-th upstream table, typed.
    pub(crate) fn input<T: 'static>(&self, slot: usize) -> Result<&StateTable<T>, StageAbort> {
        self.inputs
            .get(slot)
            .and_then(|table| downcast::<T>(table.as_ref()))
            .ok_or_else(|| StageAbort::Fatal(format!("upstream table {slot} has an unexpected type")))
    }

    /// The previous table of this stage, typed.
    pub(crate) fn previous<T: 'static>(&self) -> Option<&StateTable<T>> {
        self.previous.and_then(downcast::<T>)
    }

    /// Fail with `Cancelled` if the generation was cancelled.
    pub(crate) fn checkpoint(&self) -> Result<(), StageAbort> {
        if self.token.is_cancelled() {
            Err(StageAbort::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Fail with `ResourceExhausted` once a table grows past the ceiling.
    pub(crate) fn check_limit(&self, len: usize) -> Result<(), StageAbort> {
        if len > self.max_entries {
            Err(StageAbort::ResourceExhausted(self.max_entries))
        } else {
            Ok(())
        }
    }
}

/// A freshly evaluated stage table.
pub(crate) struct Evaluated {
    pub(crate) table: Arc<dyn AnyTable>,
    /// Comparer faults raised during reconciliation.
    pub(crate) diagnostics: Vec<Diagnostic>,
    /// Number of transform invocations performed.
    pub(crate) invocations: usize,
}

/// Conditions that end a generation without committing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StageAbort {
    Cancelled,
    Fatal(String),
    ResourceExhausted(usize),
}

/// Type-erased graph node.
pub(crate) trait StageNode: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> StageKind;
    fn upstreams(&self) -> &[StageId];

    /// Stages that opt out of caching are re-run on every generation.
    fn always_run(&self) -> bool {
        false
    }

    fn evaluate(&self, eval: &Evaluation<'_>) -> Result<Evaluated, StageAbort>;
}
