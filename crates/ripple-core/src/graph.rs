//! # Graph Construction
//!
//! [`GraphBuilder`] registers stages and hands out typed handles
//! ([`Values`] for multi-entry tables, [`Value`] for single-entry ones).
//! Calling [`GraphBuilder::build`] freezes the topology into a [`Pipeline`];
//! the builder is consumed, so no stage can be added afterwards.
//!
//! Handles carry the id of the builder that created them. Passing a handle
//! to another builder is reported by `build` as [`PipelineError::ForeignHandle`].

use crate::comparer::{Comparer, DefaultComparer};
use crate::context::{ProductionContext, TransformError};
use crate::primitives::{MAX_STAGE_NAME_LENGTH, ROOTS_STAGE_NAME};
use crate::stage::{
    CollectStage, CombineStage, Keying, PostInitStage, SourceStage, StageKind, StageNode,
    TransformFn, TransformStage,
};
use crate::topology;
use crate::types::{Diagnostic, HostOutput, PipelineError, StageId};
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Pin a closure to the transform signature so its lifetimes are inferred.
fn transform_fn<T, U, F>(f: F) -> TransformFn<T, U>
where
    F: Fn(&mut ProductionContext<'_, U>, &T) -> Result<(), TransformError> + Send + Sync + 'static,
{
    Arc::new(f)
}

// =============================================================================
// HANDLES
// =============================================================================

/// Handle to a stage whose table may hold any number of entries.
pub struct Values<T> {
    graph: u64,
    stage: StageId,
    _marker: PhantomData<fn() -> T>,
}

/// Handle to a stage whose table holds at most one entry.
pub struct Value<T> {
    graph: u64,
    stage: StageId,
    _marker: PhantomData<fn() -> T>,
}

macro_rules! handle_impls {
    ($handle:ident) => {
        impl<T> $handle<T> {
            fn new(graph: u64, stage: StageId) -> Self {
                Self {
                    graph,
                    stage,
                    _marker: PhantomData,
                }
            }
        }

        impl<T> Clone for $handle<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $handle<T> {}

        impl<T> fmt::Debug for $handle<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($handle))
                    .field("graph", &self.graph)
                    .field("stage", &self.stage)
                    .finish()
            }
        }

        impl<T> Provider<T> for $handle<T> {
            fn stage_id(&self) -> StageId {
                self.stage
            }

            fn graph_id(&self) -> u64 {
                self.graph
            }
        }
    };
}

/// Anything a stage can read from: either kind of handle.
pub trait Provider<T>: Copy {
    /// The stage behind this handle.
    fn stage_id(&self) -> StageId;
    /// Id of the builder that issued this handle.
    fn graph_id(&self) -> u64;
}

handle_impls!(Values);
handle_impls!(Value);

// =============================================================================
// STAGE OPTIONS
// =============================================================================

/// Per-stage settings for [`GraphBuilder::register`].
pub struct StageOptions<U> {
    comparer: Arc<dyn Comparer<U>>,
    always_run: bool,
}

impl<U: PartialEq + 'static> Default for StageOptions<U> {
    fn default() -> Self {
        Self {
            comparer: Arc::new(DefaultComparer),
            always_run: false,
        }
    }
}

impl<U> StageOptions<U> {
    /// Options with a custom output comparer.
    pub fn with_comparer(comparer: Arc<dyn Comparer<U>>) -> Self {
        Self {
            comparer,
            always_run: false,
        }
    }

    /// Re-run the transform for every entry on every generation.
    #[must_use]
    pub fn always_run(mut self) -> Self {
        self.always_run = true;
        self
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Registers stages and freezes them into a [`Pipeline`].
pub struct GraphBuilder {
    id: u64,
    stages: Vec<Box<dyn StageNode>>,
    names: BTreeSet<String>,
    roots: Option<Values<String>>,
    errors: Vec<PipelineError>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Start an empty graph.
    pub fn new() -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            stages: Vec::new(),
            names: BTreeSet::new(),
            roots: None,
            errors: Vec::new(),
        }
    }

    /// The root input feed, one `String` entry per input key.
    ///
    /// The stage is created on first use and shared afterwards.
    pub fn roots(&mut self) -> Values<String> {
        if let Some(roots) = self.roots {
            return roots;
        }
        let id = self.add_stage(ROOTS_STAGE_NAME, &[], |name, _| {
            Box::new(SourceStage { name })
        });
        let roots = Values::new(self.id, id);
        self.roots = Some(roots);
        roots
    }

    /// Map every entry to exactly one output.
    pub fn select<T, U, F>(&mut self, name: &str, input: Values<T>, f: F) -> Values<U>
    where
        T: Send + Sync + 'static,
        U: PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.select_with(name, input, f, StageOptions::default())
    }

    /// [`select`](Self::select) with explicit options. Output keys stay the input keys.
    pub fn select_with<T, U, F>(
        &mut self,
        name: &str,
        input: Values<T>,
        f: F,
        options: StageOptions<U>,
    ) -> Values<U>
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.try_select_with(name, input, move |value| Ok(f(value)), options)
    }

    /// Map every entry to one output, or fault that entry.
    pub fn try_select<T, U, F>(&mut self, name: &str, input: Values<T>, f: F) -> Values<U>
    where
        T: Send + Sync + 'static,
        U: PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> Result<U, TransformError> + Send + Sync + 'static,
    {
        self.try_select_with(name, input, f, StageOptions::default())
    }

    pub fn try_select_with<T, U, F>(
        &mut self,
        name: &str,
        input: Values<T>,
        f: F,
        options: StageOptions<U>,
    ) -> Values<U>
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> Result<U, TransformError> + Send + Sync + 'static,
    {
        let transform = transform_fn(move |ctx, value: &T| {
            ctx.emit(f(value)?);
            Ok(())
        });
        let id = self.add_stage_with(
            name,
            &input,
            StageKind::Transform,
            Keying::Same,
            transform,
            options,
        );
        Values::new(self.id, id)
    }

    /// Map a single value.
    pub fn select_value<T, U, F>(&mut self, name: &str, input: Value<T>, f: F) -> Value<U>
    where
        T: Send + Sync + 'static,
        U: PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.select_value_with(name, input, f, StageOptions::default())
    }

    pub fn select_value_with<T, U, F>(
        &mut self,
        name: &str,
        input: Value<T>,
        f: F,
        options: StageOptions<U>,
    ) -> Value<U>
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let transform = transform_fn(move |ctx, value: &T| {
            ctx.emit(f(value));
            Ok(())
        });
        let id = self.add_stage_with(
            name,
            &input,
            StageKind::Transform,
            Keying::Same,
            transform,
            options,
        );
        Value::new(self.id, id)
    }

    /// Map every entry to zero or more outputs.
    pub fn select_many<T, U, F>(&mut self, name: &str, input: Values<T>, f: F) -> Values<U>
    where
        T: Send + Sync + 'static,
        U: PartialEq + Send + Sync + 'static,
        F: Fn(&mut ProductionContext<'_, U>, &T) -> Result<(), TransformError> + Send + Sync + 'static,
    {
        self.register(name, input, f, StageOptions::default())
    }

    /// Keep the entries matching `predicate`.
    pub fn filter<T, F>(&mut self, name: &str, input: Values<T>, predicate: F) -> Values<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filter_with(name, input, predicate, StageOptions::default())
    }

    pub fn filter_with<T, F>(
        &mut self,
        name: &str,
        input: Values<T>,
        predicate: F,
        options: StageOptions<T>,
    ) -> Values<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let transform = transform_fn(move |ctx, value: &T| {
            if predicate(value) {
                ctx.emit(value.clone());
            }
            Ok(())
        });
        let id = self.add_stage_with(
            name,
            &input,
            StageKind::Transform,
            Keying::Same,
            transform,
            options,
        );
        Values::new(self.id, id)
    }

    /// Register a general transform with explicit options.
    pub fn register<T, U, F>(
        &mut self,
        name: &str,
        input: Values<T>,
        f: F,
        options: StageOptions<U>,
    ) -> Values<U>
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&mut ProductionContext<'_, U>, &T) -> Result<(), TransformError> + Send + Sync + 'static,
    {
        let id = self.add_stage_with(
            name,
            &input,
            StageKind::Transform,
            Keying::Indexed,
            transform_fn(f),
            options,
        );
        Values::new(self.id, id)
    }

    /// Collapse a whole table into one value holding every live entry in order.
    pub fn collect<T>(&mut self, name: &str, input: Values<T>) -> Value<Vec<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.collect_with(name, input, StageOptions::default())
    }

    pub fn collect_with<T>(
        &mut self,
        name: &str,
        input: Values<T>,
        options: StageOptions<Vec<T>>,
    ) -> Value<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = self.add_stage(name, &[(input.graph, input.stage)], |name, upstreams| {
            Box::new(CollectStage::<T> {
                name,
                upstreams,
                comparer: options.comparer,
                always_run: options.always_run,
            })
        });
        Value::new(self.id, id)
    }

    /// Pair every entry of `left` with the single value of `right`.
    pub fn combine<A, B>(&mut self, name: &str, left: Values<A>, right: Value<B>) -> Values<(A, B)>
    where
        A: Clone + PartialEq + Send + Sync + 'static,
        B: Clone + PartialEq + Send + Sync + 'static,
    {
        self.combine_with(name, left, right, StageOptions::default())
    }

    /// [`combine`](Self::combine) with a comparer over the pairs.
    ///
    /// A comparer that ignores the right side keeps the pairs `Cached` when
    /// only the right value changed, so downstream stages are skipped.
    pub fn combine_with<A, B>(
        &mut self,
        name: &str,
        left: Values<A>,
        right: Value<B>,
        options: StageOptions<(A, B)>,
    ) -> Values<(A, B)>
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
    {
        let id = self.add_combine(name, &left, &right, options);
        Values::new(self.id, id)
    }

    /// Pair two single values.
    pub fn combine_value<A, B>(&mut self, name: &str, left: Value<A>, right: Value<B>) -> Value<(A, B)>
    where
        A: Clone + PartialEq + Send + Sync + 'static,
        B: Clone + PartialEq + Send + Sync + 'static,
    {
        self.combine_value_with(name, left, right, StageOptions::default())
    }

    pub fn combine_value_with<A, B>(
        &mut self,
        name: &str,
        left: Value<A>,
        right: Value<B>,
        options: StageOptions<(A, B)>,
    ) -> Value<(A, B)>
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
    {
        let id = self.add_combine(name, &left, &right, options);
        Value::new(self.id, id)
    }

    /// Terminal stage producing externally observed `(key, value)` outputs.
    pub fn host_output<T, P, F>(&mut self, name: &str, input: P, f: F) -> Values<HostOutput>
    where
        T: Send + Sync + 'static,
        P: Provider<T>,
        F: Fn(&mut ProductionContext<'_, HostOutput>, &T) -> Result<(), TransformError>
            + Send
            + Sync
            + 'static,
    {
        let id = self.add_transform(
            name,
            &input,
            StageKind::HostOutput,
            Keying::Indexed,
            transform_fn(f),
        );
        Values::new(self.id, id)
    }

    /// Terminal stage producing diagnostics.
    pub fn diagnostic_output<T, P, F>(&mut self, name: &str, input: P, f: F) -> Values<Diagnostic>
    where
        T: Send + Sync + 'static,
        P: Provider<T>,
        F: Fn(&mut ProductionContext<'_, Diagnostic>, &T) -> Result<(), TransformError>
            + Send
            + Sync
            + 'static,
    {
        let id = self.add_transform(
            name,
            &input,
            StageKind::DiagnosticOutput,
            Keying::Indexed,
            transform_fn(f),
        );
        Values::new(self.id, id)
    }

    /// Host outputs that do not depend on any input.
    ///
    /// They appear from the first generation on and are never recomputed.
    pub fn post_init_output(&mut self, name: &str, outputs: Vec<HostOutput>) -> Values<HostOutput> {
        let id = self.add_stage(name, &[], |name, _| {
            Box::new(PostInitStage { name, outputs })
        });
        Values::new(self.id, id)
    }

    /// Freeze the topology.
    ///
    /// Reports the first registration error, if any.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let dependencies: Vec<Vec<usize>> = self
            .stages
            .iter()
            .map(|stage| stage.upstreams().iter().map(|u| u.index()).collect())
            .collect();
        let levels = topology::levels(&dependencies).map_err(|stuck| {
            PipelineError::CycleDetected(
                stuck
                    .into_iter()
                    .map(|i| self.stages[i].name().to_string())
                    .collect(),
            )
        })?;
        let levels: Vec<Vec<StageId>> = levels
            .into_iter()
            .map(|level| level.into_iter().map(|i| StageId(i as u32)).collect())
            .collect();

        tracing::debug!(
            stages = self.stages.len(),
            levels = levels.len(),
            "Pipeline built"
        );

        Ok(Pipeline {
            graph: self.id,
            stages: self.stages,
            levels,
        })
    }

    // -------------------------------------------------------------------------
    // registration helpers
    // -------------------------------------------------------------------------

    fn add_transform<T, U, P>(
        &mut self,
        name: &str,
        input: &P,
        kind: StageKind,
        keying: Keying,
        transform: TransformFn<T, U>,
    ) -> StageId
    where
        T: Send + Sync + 'static,
        U: PartialEq + Send + Sync + 'static,
        P: Provider<T>,
    {
        self.add_stage_with(name, input, kind, keying, transform, StageOptions::default())
    }

    fn add_stage_with<T, U, P>(
        &mut self,
        name: &str,
        input: &P,
        kind: StageKind,
        keying: Keying,
        transform: TransformFn<T, U>,
        options: StageOptions<U>,
    ) -> StageId
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        P: Provider<T>,
    {
        self.add_stage(name, &[(input.graph_id(), input.stage_id())], |name, upstreams| {
            Box::new(TransformStage {
                name,
                kind,
                upstreams,
                transform,
                comparer: options.comparer,
                keying,
                always_run: options.always_run,
            })
        })
    }

    fn add_combine<A, B, P>(
        &mut self,
        name: &str,
        left: &P,
        right: &Value<B>,
        options: StageOptions<(A, B)>,
    ) -> StageId
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        P: Provider<A>,
    {
        let upstreams = [
            (left.graph_id(), left.stage_id()),
            (right.graph, right.stage),
        ];
        self.add_stage(name, &upstreams, |name, upstreams| {
            Box::new(CombineStage::<A, B> {
                name,
                upstreams,
                comparer: options.comparer,
                always_run: options.always_run,
            })
        })
    }

    fn add_stage(
        &mut self,
        name: &str,
        upstreams: &[(u64, StageId)],
        make: impl FnOnce(String, Vec<StageId>) -> Box<dyn StageNode>,
    ) -> StageId {
        if name.is_empty() || name.len() > MAX_STAGE_NAME_LENGTH {
            self.errors.push(PipelineError::InvalidStageName(name.to_string()));
        } else if !self.names.insert(name.to_string()) {
            self.errors.push(PipelineError::DuplicateStage(name.to_string()));
        }
        let id = StageId(self.stages.len() as u32);
        let mut ids = Vec::with_capacity(upstreams.len());
        for &(graph, stage) in upstreams {
            if graph != self.id || stage >= id {
                self.errors.push(PipelineError::ForeignHandle(name.to_string()));
            } else {
                ids.push(stage);
            }
        }
        self.stages.push(make(name.to_string(), ids));
        id
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// A frozen stage graph, ready to be driven.
pub struct Pipeline {
    graph: u64,
    pub(crate) stages: Vec<Box<dyn StageNode>>,
    levels: Vec<Vec<StageId>>,
}

impl Pipeline {
    /// Number of stages, the roots stage included.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stage groups in evaluation order; stages of one level are independent.
    pub fn levels(&self) -> &[Vec<StageId>] {
        &self.levels
    }

    /// Every stage in a valid topological order.
    pub fn topological_order(&self) -> impl Iterator<Item = StageId> + '_ {
        self.levels.iter().flatten().copied()
    }

    /// Name of a stage.
    pub fn stage_name(&self, id: StageId) -> Option<&str> {
        self.stages.get(id.index()).map(|s| s.name())
    }

    /// Kind of a stage.
    pub fn stage_kind(&self, id: StageId) -> Option<StageKind> {
        self.stages.get(id.index()).map(|s| s.kind())
    }

    /// Look a stage up by name.
    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.stages
            .iter()
            .position(|s| s.name() == name)
            .map(|i| StageId(i as u32))
    }

    /// Upstreams of a stage.
    pub fn upstreams(&self, id: StageId) -> &[StageId] {
        self.stages.get(id.index()).map_or(&[], |s| s.upstreams())
    }

    pub(crate) fn owns<T>(&self, handle: &impl Provider<T>) -> bool {
        handle.graph_id() == self.graph && handle.stage_id().index() < self.stages.len()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline")
            .field("stages", &names)
            .field("levels", &self.levels)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
