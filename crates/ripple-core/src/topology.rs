//! # Topology
//!
//! Dependency ordering for stage graphs.
//!
//! Stages are grouped into levels: a stage's level is one more than the
//! highest level among its upstreams. Stages of the same level have no
//! dependency on each other and may be evaluated in parallel; the driver
//! joins every level before starting the next one.

use crate::types::PipelineError;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Group nodes into dependency levels.
///
/// `dependencies[n]` lists the nodes that `n` reads from. Returns the levels
/// in evaluation order, each sorted ascending, or the nodes that take part
/// in (or depend on) a cycle.
pub fn levels(dependencies: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    let count = dependencies.len();
    let mut indegree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (node, deps) in dependencies.iter().enumerate() {
        let unique: BTreeSet<usize> = deps.iter().copied().filter(|&d| d < count).collect();
        indegree[node] = unique.len();
        for dep in unique {
            dependents[dep].push(node);
        }
    }

    let mut level_of = vec![0usize; count];
    let mut queue: VecDeque<usize> = (0..count).filter(|&n| indegree[n] == 0).collect();
    let mut visited = 0usize;

    while let Some(node) = queue.pop_front() {
        visited += 1;
        for &next in &dependents[node] {
            level_of[next] = level_of[next].max(level_of[node] + 1);
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if visited != count {
        let stuck: Vec<usize> = (0..count).filter(|&n| indegree[n] > 0).collect();
        return Err(stuck);
    }

    let mut grouped: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, level) in level_of.into_iter().enumerate() {
        grouped.entry(level).or_default().push(node);
    }
    Ok(grouped.into_values().collect())
}

/// Order named nodes so that every node follows the nodes it reads from.
///
/// `nodes` holds `(name, upstream names)`. Upstream names in `external` are
/// treated as already available (for example the built-in roots stage).
/// Returns node indices in a valid registration order.
pub fn order_by_name(
    nodes: &[(&str, Vec<&str>)],
    external: &[&str],
) -> Result<Vec<usize>, PipelineError> {
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, (name, _)) in nodes.iter().enumerate() {
        if external.contains(name) || index.insert(*name, i).is_some() {
            return Err(PipelineError::DuplicateStage((*name).to_string()));
        }
    }

    let mut dependencies = Vec::with_capacity(nodes.len());
    for (_, upstreams) in nodes {
        let mut deps = Vec::new();
        for upstream in upstreams {
            if external.contains(upstream) {
                continue;
            }
            match index.get(upstream) {
                Some(&i) => deps.push(i),
                None => return Err(PipelineError::UnknownStage((*upstream).to_string())),
            }
        }
        dependencies.push(deps);
    }

    match levels(&dependencies) {
        Ok(levels) => Ok(levels.into_iter().flatten().collect()),
        Err(stuck) => Err(PipelineError::CycleDetected(
            stuck.into_iter().map(|i| nodes[i].0.to_string()).collect(),
        )),
    }
}
