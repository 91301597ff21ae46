//! The built-in roots stage.

use super::{Evaluated, Evaluation, StageAbort, StageKind, StageNode};
use crate::comparer::DefaultComparer;
use crate::table::TableBuilder;
use crate::types::{EntryKey, StageId};
use std::sync::Arc;
use std::time::Duration;

/// Exposes the root input feed as a table of strings keyed by input key.
pub(crate) struct SourceStage {
    pub(crate) name: String,
}

impl StageNode for SourceStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Source
    }

    fn upstreams(&self) -> &[StageId] {
        &[]
    }

    fn evaluate(&self, eval: &Evaluation<'_>) -> Result<Evaluated, StageAbort> {
        let comparer = DefaultComparer;
        let mut builder = TableBuilder::new(&self.name, eval.previous::<String>(), &comparer);
        for (key, value) in eval.roots.iter() {
            eval.checkpoint()?;
            let entry_key = EntryKey::root(key);
            builder.add_computed(
                entry_key.clone(),
                entry_key,
                value.to_string(),
                Duration::ZERO,
                Arc::from(Vec::new()),
                Arc::from(vec![Arc::<str>::from(key)]),
            );
            eval.check_limit(builder.len())?;
        }
        let (table, diagnostics) = builder.finish();
        Ok(Evaluated {
            table: Arc::new(table),
            diagnostics,
            invocations: 0,
        })
    }
}
