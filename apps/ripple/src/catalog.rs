//! # Transform Catalog
//!
//! The fixed set of string operations a `ripple.toml` pipeline can use, and
//! the code that turns a list of [`StageConfig`]s into a typed stage graph.
//!
//! Every stage of a configured pipeline carries `String` entries. A stage is
//! either multi-entry ([`Values`]) or single-entry ([`Value`], produced by
//! `join`); sinks (`host`, `diagnostic`, `constant`) hand out no handle and
//! cannot be read from.

use crate::config::StageConfig;
use ripple_core::{
    GraphBuilder, HostOutput, Pipeline, PipelineError, Provider, Severity, StageOptions,
    TransformError, Value, Values, primitives::ROOTS_STAGE_NAME, topology,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator used by `join` when no `arg` is given.
pub const DEFAULT_JOIN_SEPARATOR: &str = "\n";

// =============================================================================
// OPERATIONS
// =============================================================================

/// A catalog operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Uppercase every entry.
    Upper,
    /// Lowercase every entry.
    Lower,
    /// Strip surrounding whitespace.
    Trim,
    /// Reverse the characters of every entry.
    Reverse,
    /// Prepend `arg`.
    Prefix,
    /// Append `arg`.
    Suffix,
    /// Fan out into one entry per line.
    Lines,
    /// Fan out into one entry per whitespace-separated word.
    Words,
    /// Keep entries containing `arg`.
    Contains,
    /// Keep entries that are not blank.
    Nonempty,
    /// Fault every entry containing `arg`.
    FailIf,
    /// Collapse all entries into one, separated by `arg`.
    Join,
    /// Append the single value of stage `arg` to every entry.
    Attach,
    /// Host output keyed by entry key, optionally prefixed by `arg`.
    Host,
    /// Diagnostic for every entry containing `arg`, or for every entry.
    Diagnostic,
    /// Constant host output `(name, arg)`, emitted once.
    Constant,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Trim => "trim",
            Self::Reverse => "reverse",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::Lines => "lines",
            Self::Words => "words",
            Self::Contains => "contains",
            Self::Nonempty => "nonempty",
            Self::FailIf => "fail_if",
            Self::Join => "join",
            Self::Attach => "attach",
            Self::Host => "host",
            Self::Diagnostic => "diagnostic",
            Self::Constant => "constant",
        }
    }

    /// Terminal operations; nothing may read from them.
    pub fn is_sink(self) -> bool {
        matches!(self, Self::Host | Self::Diagnostic | Self::Constant)
    }

    fn requires_arg(self) -> bool {
        matches!(
            self,
            Self::Prefix | Self::Suffix | Self::Contains | Self::FailIf | Self::Attach | Self::Constant
        )
    }

    fn takes_input(self) -> bool {
        self != Self::Constant
    }

    fn supports_always_run(self) -> bool {
        !matches!(
            self,
            Self::Join | Self::Attach | Self::Host | Self::Diagnostic | Self::Constant
        )
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

fn invalid(stage: &StageConfig, message: impl std::fmt::Display) -> PipelineError {
    PipelineError::InvalidConfig(format!("stage '{}': {}", stage.name, message))
}

/// Check the fields of one stage against its operation.
pub fn validate_stage(stage: &StageConfig) -> Result<(), PipelineError> {
    let op = stage.op;
    // `.` is reserved for internal stages such as `<name>.items`.
    if stage.name.contains('.') {
        return Err(invalid(stage, "stage names may not contain '.'"));
    }
    if op.requires_arg() && stage.arg.is_none() {
        return Err(invalid(stage, format!("op '{}' requires an arg", op.name())));
    }
    match (op.takes_input(), &stage.input) {
        (true, None) => {
            return Err(invalid(stage, format!("op '{}' requires an input", op.name())));
        }
        (false, Some(_)) => {
            return Err(invalid(stage, format!("op '{}' takes no input", op.name())));
        }
        _ => {}
    }
    if stage.always_run && !op.supports_always_run() {
        return Err(invalid(
            stage,
            format!("op '{}' does not support always_run", op.name()),
        ));
    }
    Ok(())
}

/// Stage names a configured stage reads from.
fn upstream_names(stage: &StageConfig) -> Vec<&str> {
    let mut names: Vec<&str> = stage.input.iter().map(String::as_str).collect();
    if stage.op == Op::Attach {
        names.extend(stage.arg.as_deref());
    }
    names
}

// =============================================================================
// GRAPH CONSTRUCTION
// =============================================================================

#[derive(Clone, Copy)]
enum Handle {
    Many(Values<String>),
    One(Value<String>),
}

struct Assembler<'a> {
    graph: GraphBuilder,
    handles: BTreeMap<&'a str, Handle>,
}

impl<'a> Assembler<'a> {
    fn handle(&self, stage: &StageConfig, name: &str) -> Result<Handle, PipelineError> {
        self.handles
            .get(name)
            .copied()
            .ok_or_else(|| invalid(stage, format!("cannot read from sink '{}'", name)))
    }

    fn input(&self, stage: &StageConfig) -> Result<Handle, PipelineError> {
        let name = stage
            .input
            .as_deref()
            .ok_or_else(|| invalid(stage, "missing input"))?;
        self.handle(stage, name)
    }

    fn many(&self, stage: &StageConfig) -> Result<Values<String>, PipelineError> {
        match self.input(stage)? {
            Handle::Many(values) => Ok(values),
            Handle::One(_) => Err(invalid(
                stage,
                format!("op '{}' needs a multi-entry input", stage.op.name()),
            )),
        }
    }

    fn add(&mut self, stage: &'a StageConfig) -> Result<(), PipelineError> {
        let name = stage.name.as_str();
        let arg = stage.arg.clone().unwrap_or_default();
        let options = || {
            let options = StageOptions::<String>::default();
            if stage.always_run {
                options.always_run()
            } else {
                options
            }
        };

        let produced = match stage.op {
            Op::Upper | Op::Lower | Op::Trim | Op::Reverse | Op::Prefix | Op::Suffix => {
                let map = string_map(stage.op, arg);
                Some(match self.input(stage)? {
                    Handle::Many(input) => {
                        Handle::Many(self.graph.select_with(name, input, map, options()))
                    }
                    Handle::One(input) => {
                        if stage.always_run {
                            return Err(invalid(stage, "always_run needs a multi-entry input"));
                        }
                        Handle::One(self.graph.select_value(name, input, map))
                    }
                })
            }
            Op::Lines => {
                let input = self.many(stage)?;
                let lines = self.graph.register(
                    name,
                    input,
                    |ctx, text: &String| {
                        for line in text.lines() {
                            ctx.checkpoint()?;
                            ctx.emit(line.to_string());
                        }
                        Ok(())
                    },
                    options(),
                );
                Some(Handle::Many(lines))
            }
            Op::Words => {
                let input = self.many(stage)?;
                let words = self.graph.register(
                    name,
                    input,
                    |ctx, text: &String| {
                        for word in text.split_whitespace() {
                            ctx.checkpoint()?;
                            ctx.emit(word.to_string());
                        }
                        Ok(())
                    },
                    options(),
                );
                Some(Handle::Many(words))
            }
            Op::Contains => {
                let input = self.many(stage)?;
                let kept = self.graph.filter_with(
                    name,
                    input,
                    move |text: &String| text.contains(arg.as_str()),
                    options(),
                );
                Some(Handle::Many(kept))
            }
            Op::Nonempty => {
                let input = self.many(stage)?;
                let kept = self.graph.filter_with(
                    name,
                    input,
                    |text: &String| !text.trim().is_empty(),
                    options(),
                );
                Some(Handle::Many(kept))
            }
            Op::FailIf => {
                let input = self.many(stage)?;
                let checked = self.graph.try_select_with(
                    name,
                    input,
                    move |text: &String| {
                        if text.contains(arg.as_str()) {
                            Err(TransformError::failed(format!("entry contains '{}'", arg)))
                        } else {
                            Ok(text.clone())
                        }
                    },
                    options(),
                );
                Some(Handle::Many(checked))
            }
            Op::Join => {
                let input = self.many(stage)?;
                let separator = stage
                    .arg
                    .clone()
                    .unwrap_or_else(|| DEFAULT_JOIN_SEPARATOR.to_string());
                let items = self.graph.collect(&format!("{}.items", name), input);
                let joined = self
                    .graph
                    .select_value(name, items, move |items: &Vec<String>| items.join(&separator));
                Some(Handle::One(joined))
            }
            Op::Attach => {
                let right = match self.handle(stage, &arg)? {
                    Handle::One(value) => value,
                    Handle::Many(_) => {
                        return Err(invalid(
                            stage,
                            format!("attach source '{}' must be single-entry (use join)", arg),
                        ));
                    }
                };
                let pairs_name = format!("{}.pairs", name);
                let attach = |pair: &(String, String)| format!("{} {}", pair.0, pair.1);
                Some(match self.input(stage)? {
                    Handle::Many(left) => {
                        let pairs = self.graph.combine(&pairs_name, left, right);
                        Handle::Many(self.graph.select(name, pairs, attach))
                    }
                    Handle::One(left) => {
                        let pair = self.graph.combine_value(&pairs_name, left, right);
                        Handle::One(self.graph.select_value(name, pair, attach))
                    }
                })
            }
            Op::Host => {
                match self.input(stage)? {
                    Handle::Many(input) => add_host(&mut self.graph, name, input, arg),
                    Handle::One(input) => add_host(&mut self.graph, name, input, arg),
                }
                None
            }
            Op::Diagnostic => {
                let needle = stage.arg.clone();
                match self.input(stage)? {
                    Handle::Many(input) => add_diagnostic(&mut self.graph, name, input, needle),
                    Handle::One(input) => add_diagnostic(&mut self.graph, name, input, needle),
                }
                None
            }
            Op::Constant => {
                self.graph
                    .post_init_output(name, vec![HostOutput::new(name, arg)]);
                None
            }
        };

        if let Some(handle) = produced {
            self.handles.insert(name, handle);
        }
        Ok(())
    }
}

fn add_host<P: Provider<String>>(graph: &mut GraphBuilder, name: &str, input: P, prefix: String) {
    graph.host_output(name, input, move |ctx, text: &String| {
        let key = format!("{}{}", prefix, ctx.input_key());
        ctx.add_output(key, text.clone());
        Ok(())
    });
}

fn add_diagnostic<P: Provider<String>>(
    graph: &mut GraphBuilder,
    name: &str,
    input: P,
    needle: Option<String>,
) {
    graph.diagnostic_output(name, input, move |ctx, text: &String| {
        match &needle {
            Some(needle) if text.contains(needle.as_str()) => {
                let message = format!("'{}' found in {}", needle, ctx.input_key());
                ctx.report(Severity::Warning, message);
            }
            Some(_) => {}
            None => ctx.report(Severity::Info, text.clone()),
        }
        Ok(())
    });
}

/// The 1:1 string function behind a mapping op.
fn string_map(op: Op, arg: String) -> impl Fn(&String) -> String + Clone + Send + Sync + 'static {
    move |text: &String| match op {
        Op::Upper => text.to_uppercase(),
        Op::Lower => text.to_lowercase(),
        Op::Trim => text.trim().to_string(),
        Op::Reverse => text.chars().rev().collect(),
        Op::Prefix => format!("{}{}", arg, text),
        Op::Suffix => format!("{}{}", text, arg),
        _ => text.clone(),
    }
}

/// Build a pipeline from configured stages.
///
/// Stages may be listed in any order; they are registered after the stages
/// they read from. `roots` names the root input feed.
pub fn build_pipeline(stages: &[StageConfig]) -> Result<Pipeline, PipelineError> {
    for stage in stages {
        validate_stage(stage)?;
    }

    let nodes: Vec<(&str, Vec<&str>)> = stages
        .iter()
        .map(|stage| (stage.name.as_str(), upstream_names(stage)))
        .collect();
    let order = topology::order_by_name(&nodes, &[ROOTS_STAGE_NAME])?;

    let mut assembler = Assembler {
        graph: GraphBuilder::new(),
        handles: BTreeMap::new(),
    };
    let roots = assembler.graph.roots();
    assembler.handles.insert(ROOTS_STAGE_NAME, Handle::Many(roots));

    for index in order {
        if let Some(stage) = stages.get(index) {
            assembler.add(stage)?;
        }
    }

    let pipeline = assembler.graph.build()?;
    tracing::debug!(stages = pipeline.stage_count(), "Configured pipeline built");
    Ok(pipeline)
}

// =============================================================================
// TESTS
// =============================================================================
