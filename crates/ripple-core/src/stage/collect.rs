//! Fan-in stage: the whole upstream table becomes one value.

use super::{Evaluated, Evaluation, StageAbort, StageKind, StageNode};
use crate::comparer::Comparer;
use crate::table::TableBuilder;
use crate::types::{EntryKey, StageId, Upstream};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

pub(crate) struct CollectStage<T> {
    pub(crate) name: String,
    pub(crate) upstreams: Vec<StageId>,
    pub(crate) comparer: Arc<dyn Comparer<Vec<T>>>,
    pub(crate) always_run: bool,
}

impl<T> StageNode for CollectStage<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Collect
    }

    fn upstreams(&self) -> &[StageId] {
        &self.upstreams
    }

    fn always_run(&self) -> bool {
        self.always_run
    }

    fn evaluate(&self, eval: &Evaluation<'_>) -> Result<Evaluated, StageAbort> {
        eval.checkpoint()?;
        let input = eval.input::<T>(0)?;
        let upstream = self.upstreams.first().copied().unwrap_or(StageId(0));

        let started = Instant::now();
        let mut values = Vec::with_capacity(input.len());
        let mut provenance = Vec::with_capacity(input.len());
        let mut roots: BTreeSet<Arc<str>> = BTreeSet::new();
        for (index, entry) in input.entries().iter().enumerate() {
            if let Some(value) = entry.value() {
                values.push(value.clone());
                provenance.push(Upstream {
                    stage: upstream,
                    index,
                });
                roots.extend(entry.roots().iter().cloned());
            }
        }
        let elapsed = started.elapsed();

        // The single output exists even when the input is empty.
        let mut builder =
            TableBuilder::new(&self.name, eval.previous::<Vec<T>>(), self.comparer.as_ref());
        builder.add_computed(
            EntryKey::unit(),
            EntryKey::unit(),
            values,
            elapsed,
            Arc::from(provenance),
            roots.into_iter().collect(),
        );
        let (table, diagnostics) = builder.finish();
        Ok(Evaluated {
            table: Arc::new(table),
            diagnostics,
            invocations: 1,
        })
    }
}
