//! Constant host outputs registered while the graph is built.

use super::{Evaluated, Evaluation, StageAbort, StageKind, StageNode};
use crate::comparer::DefaultComparer;
use crate::table::TableBuilder;
use crate::types::{EntryKey, HostOutput, StageId};
use std::sync::Arc;
use std::time::Duration;

/// Produces its outputs on the first generation and is skipped afterwards.
pub(crate) struct PostInitStage {
    pub(crate) name: String,
    pub(crate) outputs: Vec<HostOutput>,
}

impl StageNode for PostInitStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::PostInit
    }

    fn upstreams(&self) -> &[StageId] {
        &[]
    }

    fn evaluate(&self, eval: &Evaluation<'_>) -> Result<Evaluated, StageAbort> {
        let comparer = DefaultComparer;
        let mut builder = TableBuilder::new(&self.name, eval.previous::<HostOutput>(), &comparer);
        for (ordinal, output) in self.outputs.iter().enumerate() {
            let key = EntryKey::unit().child(ordinal as u32);
            builder.add_computed(
                key.clone(),
                key,
                output.clone(),
                Duration::ZERO,
                Arc::from(Vec::new()),
                Arc::from(Vec::new()),
            );
        }
        let (table, diagnostics) = builder.finish();
        Ok(Evaluated {
            table: Arc::new(table),
            diagnostics,
            invocations: 0,
        })
    }
}
