//! # Driver
//!
//! Runs generations over a frozen [`Pipeline`].
//!
//! One generation walks the stage levels in order. Inside a level the stages
//! are independent and are evaluated in parallel; every level is joined before
//! the next one starts. A stage is skipped (its previous table re-used as
//! all-`Cached`) when none of its inputs changed, except for stages that opt
//! out of caching.
//!
//! ## Commit
//!
//! The new tables, sink outputs and report replace the previous ones only
//! when the whole walk succeeds. A cancelled or aborted generation leaves the
//! last completed generation visible and untouched.

use crate::context::CancellationToken;
use crate::graph::{Pipeline, Provider};
use crate::inputs::{InputDiff, RootInputs};
use crate::primitives::DEFAULT_MAX_TABLE_ENTRIES;
use crate::stage::{Evaluation, StageAbort, StageKind, StageNode};
use crate::table::{AnyTable, StateCounts, StateTable, downcast};
use crate::types::{
    Diagnostic, DiagnosticKind, HostOutput, PipelineError, Severity, StageId,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// OPTIONS
// =============================================================================

/// Tunables of a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverOptions {
    /// Evaluate independent stages of one level on the rayon pool.
    pub parallel: bool,
    /// Ceiling on the entries of any single stage table.
    pub max_table_entries: usize,
    /// Keep per-stage summaries in the generation report.
    pub track_steps: bool,
    /// Sink kinds whose outputs and faults are left out of the generation's
    /// outputs. Only `host_output`, `diagnostic_output` and `post_init` apply.
    pub disabled_outputs: BTreeSet<StageKind>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            max_table_entries: DEFAULT_MAX_TABLE_ENTRIES,
            track_steps: true,
            disabled_outputs: BTreeSet::new(),
        }
    }
}

impl DriverOptions {
    /// Suppress the outputs of one sink kind.
    #[must_use]
    pub fn disable_output(mut self, kind: StageKind) -> Self {
        self.disabled_outputs.insert(kind);
        self
    }

    /// Whether stages of `kind` contribute to the generation's outputs.
    pub fn output_enabled(&self, kind: StageKind) -> bool {
        !(kind.is_sink() && self.disabled_outputs.contains(&kind))
    }
}

// =============================================================================
// REPORTS
// =============================================================================

/// Everything the sinks produced in one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkOutputs {
    /// Host outputs in topological stage order, then table order.
    pub host_outputs: Vec<HostOutput>,
    /// Faults, comparer failures and reported diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

static NO_OUTPUTS: SinkOutputs = SinkOutputs {
    host_outputs: Vec::new(),
    diagnostics: Vec::new(),
};

/// What happened to one stage in one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRunSummary {
    pub name: String,
    pub kind: StageKind,
    /// The previous table was re-used without evaluating the stage.
    pub skipped: bool,
    pub invocations: usize,
    pub added: usize,
    pub modified: usize,
    pub cached: usize,
    pub removed: usize,
    pub faults: usize,
    pub elapsed_micros: u64,
}

/// Summary of a completed generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub generation: u64,
    pub input_version: u64,
    pub input_diff: InputDiff,
    pub elapsed_micros: u64,
    /// Empty unless step tracking is enabled.
    pub stages: Vec<StageRunSummary>,
    pub outputs: SinkOutputs,
}

impl GenerationReport {
    /// Number of stages that were evaluated rather than skipped.
    pub fn evaluated_stages(&self) -> usize {
        self.stages.iter().filter(|s| !s.skipped).count()
    }

    /// Summary of a stage by name.
    pub fn stage(&self, name: &str) -> Option<&StageRunSummary> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// How a call to [`Driver::run_generation`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The generation was committed.
    Completed(GenerationReport),
    /// The token was cancelled; nothing was committed.
    Cancelled,
}

impl GenerationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn report(&self) -> Option<&GenerationReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Cancelled => None,
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

// =============================================================================
// DRIVER
// =============================================================================

struct Committed {
    roots: RootInputs,
    tables: Vec<Arc<dyn AnyTable>>,
    report: GenerationReport,
}

struct StageRun {
    table: Arc<dyn AnyTable>,
    diagnostics: Vec<Diagnostic>,
    summary: StageRunSummary,
}

/// Owns a pipeline and the state of its last completed generation.
pub struct Driver {
    pipeline: Pipeline,
    options: DriverOptions,
    committed: Option<Committed>,
}

impl Driver {
    /// Driver with default options.
    pub fn new(pipeline: Pipeline) -> Self {
        Self::with_options(pipeline, DriverOptions::default())
    }

    pub fn with_options(pipeline: Pipeline, options: DriverOptions) -> Self {
        Self {
            pipeline,
            options,
            committed: None,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Number of the last completed generation, if any.
    pub fn generation(&self) -> Option<u64> {
        self.committed.as_ref().map(|c| c.report.generation)
    }

    /// Root inputs of the last completed generation.
    pub fn committed_roots(&self) -> Option<&RootInputs> {
        self.committed.as_ref().map(|c| &c.roots)
    }

    /// Sink outputs of the last completed generation (empty before the first).
    /// Host output keys are unique here; sink tables may still hold the
    /// dropped duplicates.
    pub fn outputs(&self) -> &SinkOutputs {
        self.committed
            .as_ref()
            .map_or(&NO_OUTPUTS, |c| &c.report.outputs)
    }

    pub fn last_report(&self) -> Option<&GenerationReport> {
        self.committed.as_ref().map(|c| &c.report)
    }

    /// The committed table behind a handle. Sink tables are not deduplicated
    /// against each other.
    pub fn table<T, P>(&self, handle: P) -> Option<Arc<StateTable<T>>>
    where
        T: Send + Sync + 'static,
        P: Provider<T>,
    {
        if !self.pipeline.owns(&handle) {
            return None;
        }
        let table = self.committed.as_ref()?.tables.get(handle.stage_id().index())?;
        Arc::clone(table).into_any().downcast::<StateTable<T>>().ok()
    }

    /// Every committed stage table, in stage order.
    pub(crate) fn committed_tables(&self) -> Option<&[Arc<dyn AnyTable>]> {
        self.committed.as_ref().map(|c| c.tables.as_slice())
    }

    /// Forget all state; the next generation starts from scratch.
    pub fn reset(&mut self) {
        self.committed = None;
        tracing::info!("Driver state reset");
    }

    /// Run one generation against `roots`.
    ///
    /// Returns `Ok(Cancelled)` if the token fires before commit, and an error
    /// for catastrophic faults (fatal transform errors, table limits). In both
    /// cases the previous generation stays visible.
    pub fn run_generation(
        &mut self,
        roots: &RootInputs,
        token: &CancellationToken,
    ) -> Result<GenerationOutcome, PipelineError> {
        let started = Instant::now();
        let previous = self.committed.as_ref();
        let generation = previous.map_or(0, |c| c.report.generation + 1);
        let _span = tracing::info_span!("generation", generation).entered();

        let roots_changed = previous.is_none_or(|c| !c.roots.same_contents(roots));
        let input_diff = match previous {
            Some(c) => roots.diff(&c.roots),
            None => roots.diff(&RootInputs::new()),
        };

        let count = self.pipeline.stage_count();
        let mut tables: Vec<Option<Arc<dyn AnyTable>>> = vec![None; count];
        let mut summaries: Vec<StageRunSummary> = Vec::with_capacity(count);
        let mut comparer_diagnostics = Vec::new();

        for level in self.pipeline.levels() {
            if token.is_cancelled() {
                tracing::info!("Generation cancelled");
                return Ok(GenerationOutcome::Cancelled);
            }

            let run = |&id: &StageId| {
                (id, self.run_stage(id, &tables, previous, roots, roots_changed, token))
            };
            let results: Vec<(StageId, Result<StageRun, StageAbort>)> =
                if self.options.parallel && level.len() > 1 {
                    level.par_iter().map(run).collect()
                } else {
                    level.iter().map(run).collect()
                };

            for (id, result) in results {
                let name = self.stage_name(id);
                match result {
                    Ok(stage_run) => {
                        tables[id.index()] = Some(stage_run.table);
                        if self.options.output_enabled(stage_run.summary.kind) {
                            comparer_diagnostics.extend(stage_run.diagnostics);
                        }
                        summaries.push(stage_run.summary);
                    }
                    Err(StageAbort::Cancelled) => {
                        tracing::info!(stage = name, "Generation cancelled");
                        return Ok(GenerationOutcome::Cancelled);
                    }
                    Err(StageAbort::Fatal(message)) => {
                        tracing::error!(stage = name, "Generation aborted: {}", message);
                        return Err(PipelineError::GenerationAborted {
                            stage: name.to_string(),
                            message,
                        });
                    }
                    Err(StageAbort::ResourceExhausted(limit)) => {
                        tracing::error!(stage = name, limit, "Stage table limit exceeded");
                        return Err(PipelineError::ResourceExhausted {
                            stage: name.to_string(),
                            limit,
                        });
                    }
                }
            }
        }

        let tables: Vec<Arc<dyn AnyTable>> = match tables.into_iter().collect::<Option<Vec<_>>>() {
            Some(tables) => tables,
            None => {
                return Err(PipelineError::GenerationAborted {
                    stage: String::new(),
                    message: "a stage was not evaluated".to_string(),
                });
            }
        };

        if token.is_cancelled() {
            tracing::info!("Generation cancelled before commit");
            return Ok(GenerationOutcome::Cancelled);
        }

        let outputs = self.emit_sinks(&tables, comparer_diagnostics);
        let report = GenerationReport {
            generation,
            input_version: roots.version(),
            input_diff,
            elapsed_micros: micros(started.elapsed()),
            stages: if self.options.track_steps {
                summaries
            } else {
                Vec::new()
            },
            outputs,
        };

        tracing::info!(
            outputs = report.outputs.host_outputs.len(),
            diagnostics = report.outputs.diagnostics.len(),
            elapsed_us = report.elapsed_micros,
            "Generation completed"
        );

        self.committed = Some(Committed {
            roots: roots.clone(),
            tables,
            report: report.clone(),
        });
        Ok(GenerationOutcome::Completed(report))
    }

    fn stage_name(&self, id: StageId) -> &str {
        self.pipeline.stage_name(id).unwrap_or_default()
    }

    fn run_stage(
        &self,
        id: StageId,
        tables: &[Option<Arc<dyn AnyTable>>],
        previous: Option<&Committed>,
        roots: &RootInputs,
        roots_changed: bool,
        token: &CancellationToken,
    ) -> Result<StageRun, StageAbort> {
        let Some(node) = self.pipeline.stages.get(id.index()) else {
            return Err(StageAbort::Fatal(format!("unknown stage {id}")));
        };
        let mut inputs = Vec::with_capacity(node.upstreams().len());
        for upstream in node.upstreams() {
            match tables.get(upstream.index()).and_then(Option::as_ref) {
                Some(table) => inputs.push(Arc::clone(table)),
                None => {
                    return Err(StageAbort::Fatal(format!(
                        "upstream {upstream} of '{}' was not evaluated",
                        node.name()
                    )));
                }
            }
        }
        let previous_table = previous.and_then(|c| c.tables.get(id.index())).cloned();
        let started = Instant::now();

        if let Some(prev) = &previous_table {
            if !node.always_run() && unchanged(node.as_ref(), &inputs, roots_changed) {
                let table = Arc::clone(prev).cached_projection();
                tracing::debug!(stage = node.name(), "Stage skipped");
                let summary = summarize(node.as_ref(), table.as_ref(), true, 0, started.elapsed());
                return Ok(StageRun {
                    table,
                    diagnostics: Vec::new(),
                    summary,
                });
            }
        }

        let evaluation = Evaluation {
            inputs: &inputs,
            previous: previous_table.as_deref(),
            roots,
            token,
            max_entries: self.options.max_table_entries,
        };
        let evaluated = node.evaluate(&evaluation)?;
        let summary = summarize(
            node.as_ref(),
            evaluated.table.as_ref(),
            false,
            evaluated.invocations,
            started.elapsed(),
        );
        tracing::debug!(
            stage = node.name(),
            invocations = summary.invocations,
            added = summary.added,
            modified = summary.modified,
            removed = summary.removed,
            faults = summary.faults,
            "Stage evaluated"
        );
        Ok(StageRun {
            table: evaluated.table,
            diagnostics: evaluated.diagnostics,
            summary,
        })
    }

    /// Flatten sink tables (and faults) into the generation's outputs.
    fn emit_sinks(
        &self,
        tables: &[Arc<dyn AnyTable>],
        comparer_diagnostics: Vec<Diagnostic>,
    ) -> SinkOutputs {
        let mut outputs = SinkOutputs::default();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for id in self.pipeline.topological_order() {
            let Some((node, table)) = self.pipeline.stages.get(id.index()).zip(tables.get(id.index()))
            else {
                continue;
            };
            if !self.options.output_enabled(node.kind()) {
                continue;
            }
            outputs
                .diagnostics
                .extend(table.fault_list().iter().map(|f| f.diagnostic.clone()));

            match node.kind() {
                StageKind::HostOutput | StageKind::PostInit => {
                    let Some(table) = downcast::<HostOutput>(table.as_ref()) else {
                        continue;
                    };
                    for entry in table.live() {
                        let output = entry.last_value();
                        if seen.insert(output.key.clone()) {
                            outputs.host_outputs.push(output.clone());
                        } else {
                            tracing::warn!(stage = node.name(), key = %output.key, "Duplicate host output key");
                            outputs.diagnostics.push(Diagnostic::new(
                                Severity::Warning,
                                DiagnosticKind::DuplicateOutputKey,
                                node.name(),
                                entry.roots(),
                                format!("host output key '{}' was already produced", output.key),
                            ));
                        }
                    }
                }
                StageKind::DiagnosticOutput => {
                    if let Some(table) = downcast::<Diagnostic>(table.as_ref()) {
                        outputs.diagnostics.extend(table.values().cloned());
                    }
                }
                _ => {}
            }
        }
        outputs.diagnostics.extend(comparer_diagnostics);
        outputs
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("pipeline", &self.pipeline)
            .field("options", &self.options)
            .field("generation", &self.generation())
            .finish()
    }
}

/// Whether a stage with a previous table can be skipped.
fn unchanged(node: &dyn StageNode, inputs: &[Arc<dyn AnyTable>], roots_changed: bool) -> bool {
    match node.kind() {
        StageKind::Source => !roots_changed,
        _ => inputs.iter().all(|table| !table.has_changes()),
    }
}

fn summarize(
    node: &dyn StageNode,
    table: &dyn AnyTable,
    skipped: bool,
    invocations: usize,
    elapsed: Duration,
) -> StageRunSummary {
    let StateCounts {
        added,
        modified,
        cached,
        removed,
    } = table.counts();
    StageRunSummary {
        name: node.name().to_string(),
        kind: node.kind(),
        skipped,
        invocations,
        added,
        modified,
        cached,
        removed,
        faults: table.fault_list().len(),
        elapsed_micros: micros(elapsed),
    }
}

// =============================================================================
// TESTS
// =============================================================================
