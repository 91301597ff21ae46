//! Pairs every entry of a table with the single value of another stage.

use super::{Evaluated, Evaluation, StageAbort, StageKind, StageNode};
use crate::comparer::Comparer;
use crate::table::TableBuilder;
use crate::types::{EntryState, StageId, Upstream};
use std::sync::Arc;
use std::time::Instant;

/// Output keys follow the left entries; the right side is a one-entry table.
pub(crate) struct CombineStage<A, B> {
    pub(crate) name: String,
    /// `[left, right]`
    pub(crate) upstreams: Vec<StageId>,
    pub(crate) comparer: Arc<dyn Comparer<(A, B)>>,
    pub(crate) always_run: bool,
}

impl<A, B> StageNode for CombineStage<A, B>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Combine
    }

    fn upstreams(&self) -> &[StageId] {
        &self.upstreams
    }

    fn always_run(&self) -> bool {
        self.always_run
    }

    fn evaluate(&self, eval: &Evaluation<'_>) -> Result<Evaluated, StageAbort> {
        let left = eval.input::<A>(0)?;
        let right = eval.input::<B>(1)?;
        let previous = eval.previous::<(A, B)>();
        let (left_stage, right_stage) = match self.upstreams.as_slice() {
            [l, r] => (*l, *r),
            _ => return Err(StageAbort::Fatal(format!("combine stage '{}' needs two upstreams", self.name))),
        };

        let right_entry = right
            .entries()
            .iter()
            .enumerate()
            .find(|(_, entry)| !entry.is_removed());
        let right_changed = right.has_changes();

        let mut builder = TableBuilder::new(&self.name, previous, self.comparer.as_ref());
        let mut invocations = 0usize;

        for (index, entry) in left.entries().iter().enumerate() {
            let Some(left_value) = entry.value() else {
                continue;
            };
            eval.checkpoint()?;
            let Some((right_index, right_value)) = right_entry else {
                continue;
            };
            let provenance: Arc<[Upstream]> = Arc::from(vec![
                Upstream {
                    stage: left_stage,
                    index,
                },
                Upstream {
                    stage: right_stage,
                    index: right_index,
                },
            ]);

            let reusable = previous
                .filter(|_| {
                    !self.always_run && !right_changed && entry.state() == EntryState::Cached
                })
                .and_then(|p| p.get(entry.key()));
            if let Some(prev) = reusable {
                builder.add_projected(prev, provenance);
            } else {
                let started = Instant::now();
                let pair = (left_value.clone(), right_value.last_value().clone());
                let elapsed = started.elapsed();
                invocations += 1;
                builder.add_computed(
                    entry.key().clone(),
                    entry.key().clone(),
                    pair,
                    elapsed,
                    provenance,
                    Arc::from(entry.roots()),
                );
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
