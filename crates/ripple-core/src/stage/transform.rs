//! Per-entry transform stage.
//!
//! Backs `select`, `filter`, `select_many`, `register` and both output sinks.
//! For every live upstream entry the transform is invoked, unless the entry
//! is `Cached` and the stage caches, in which case the previous outputs for
//! that entry (and any fault recorded for it) are projected forward.

use super::{Evaluated, Evaluation, StageAbort, StageKind, StageNode};
use crate::comparer::Comparer;
use crate::context::{ProductionContext, Produced, TransformError, invoke};
use crate::table::{Fault, TableBuilder};
use crate::types::{Diagnostic, DiagnosticKind, EntryKey, EntryState, Severity, StageId, Upstream};
use std::sync::Arc;
use std::time::Instant;

/// User transform: fills the context with outputs for one input value.
pub(crate) type TransformFn<T, U> =
    Arc<dyn Fn(&mut ProductionContext<'_, U>, &T) -> Result<(), TransformError> + Send + Sync>;

/// How output keys are derived from the input key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keying {
    /// At most one output, keyed like its input.
    Same,
    /// Any number of outputs, keyed by input key plus emission ordinal.
    Indexed,
}

pub(crate) struct TransformStage<T, U> {
    pub(crate) name: String,
    pub(crate) kind: StageKind,
    pub(crate) upstreams: Vec<StageId>,
    pub(crate) transform: TransformFn<T, U>,
    pub(crate) comparer: Arc<dyn Comparer<U>>,
    pub(crate) keying: Keying,
    pub(crate) always_run: bool,
}

impl<T, U> TransformStage<T, U> {
    fn fault(&self, origin: &EntryKey, roots: &[Arc<str>], message: String) -> Fault {
        tracing::warn!(stage = %self.name, key = %origin, "Transform fault: {}", message);
        Fault {
            origin: origin.clone(),
            diagnostic: Diagnostic::new(
                Severity::Warning,
                DiagnosticKind::TransformFault,
                &self.name,
                roots,
                message,
            ),
        }
    }
}

impl<T, U> StageNode for TransformStage<T, U>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    fn upstreams(&self) -> &[StageId] {
        &self.upstreams
    }

    fn always_run(&self) -> bool {
        self.always_run
    }

    fn evaluate(&self, eval: &Evaluation<'_>) -> Result<Evaluated, StageAbort> {
        let input = eval.input::<T>(0)?;
        let previous = eval.previous::<U>();
        let upstream = self.upstreams.first().copied().unwrap_or(StageId(0));

        let previous_groups = previous.map(|p| p.groups()).unwrap_or_default();
        let previous_faults = previous.map(|p| p.faults_by_origin()).unwrap_or_default();
        let caching = !self.always_run && previous.is_some();

        let mut builder = TableBuilder::new(&self.name, previous, self.comparer.as_ref());
        let mut invocations = 0usize;

        for (index, entry) in input.entries().iter().enumerate() {
            if entry.is_removed() {
                continue;
            }
            eval.checkpoint()?;
            let provenance: Arc<[Upstream]> = Arc::from(vec![Upstream {
                stage: upstream,
                index,
            }]);

            if caching && entry.state() == EntryState::Cached {
                if let Some(group) = previous_groups.get(entry.key()) {
                    for output in group {
                        builder.add_projected(output, Arc::clone(&provenance));
                    }
                }
                if let Some(faults) = previous_faults.get(entry.key()) {
                    for fault in faults {
                        builder.add_fault((*fault).clone());
                    }
                }
                eval.check_limit(builder.len())?;
                continue;
            }

            let Some(value) = entry.value() else {
                continue;
            };
            let ctx = ProductionContext::new(&self.name, entry.key(), entry.roots(), eval.token);
            let started = Instant::now();
            let produced = invoke(ctx, |ctx| (self.transform)(ctx, value));
            let elapsed = started.elapsed();
            invocations += 1;

            match produced {
                Produced::Values(outputs) => {
                    if self.keying == Keying::Same && outputs.len() > 1 {
                        builder.add_fault(self.fault(
                            entry.key(),
                            entry.roots(),
                            format!("expected at most one output, got {}", outputs.len()),
                        ));
                        continue;
                    }
                    for (ordinal, output) in outputs.into_iter().enumerate() {
                        let key = match self.keying {
                            Keying::Same => entry.key().clone(),
                            Keying::Indexed => entry.key().child(ordinal as u32),
                        };
                        builder.add_computed(
                            key,
                            entry.key().clone(),
                            output,
                            elapsed,
                            Arc::clone(&provenance),
                            Arc::from(entry.roots()),
                        );
                    }
                }
                Produced::Faulted(message) => {
                    builder.add_fault(self.fault(entry.key(), entry.roots(), message));
                }
                Produced::Cancelled => return Err(StageAbort::Cancelled),
                Produced::Fatal(message) => return Err(StageAbort::Fatal(message)),
            }
            eval.check_limit(builder.len())?;
        }

        let (table, diagnostics) = builder.finish();
        Ok(Evaluated {
            table: Arc::new(table),
            diagnostics,
            invocations,
        })
    }
}
