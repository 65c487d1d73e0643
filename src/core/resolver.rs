//! Dependency resolution for formulas
//!
//! Orders formulas so every `@formula` reference is computed before the formula
//! that uses it. Cycles are tolerated: the back-edge is reported and skipped,
//! and the cyclic formula later reads whatever value is present at that point.

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::parser::extract_references;
use crate::types::Formula;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

/// Formula-to-formula edges: for each formula, the indices of the formulas it
/// depends on. Uses the union of the cached `dependencies` and the `@id`
/// references found in the expression; ids that are not formulas are ignored.
fn dependency_indices(formulas: &[Formula]) -> Vec<Vec<usize>> {
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    for (i, formula) in formulas.iter().enumerate() {
        index_of.entry(formula.id.as_str()).or_insert(i);
    }

    formulas
        .iter()
        .map(|formula| {
            let scanned = extract_references(&formula.expression).formulas;

            let mut deps: Vec<usize> = Vec::new();
            for id in scanned.iter().chain(formula.dependencies.iter()) {
                if let Some(&idx) = index_of.get(id.as_str()) {
                    if !deps.contains(&idx) {
                        deps.push(idx);
                    }
                }
            }
            deps
        })
        .collect()
}

/// Evaluation order for `formulas`.
///
/// Depth-first over roots in array order, dependencies appended before their
/// dependents. Every formula appears exactly once. A reference back into the
/// formula currently being visited is a cycle: a `CircularDependency`
/// diagnostic is emitted and that edge is not followed.
pub fn order<'a>(formulas: &'a [Formula], sink: &dyn DiagnosticSink) -> Vec<&'a Formula> {
    let deps = dependency_indices(formulas);
    let mut marks = vec![Mark::Unvisited; formulas.len()];
    let mut ordered = Vec::with_capacity(formulas.len());

    for root in 0..formulas.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // (node, next dependency to look at)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::Visiting;

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let Some(&dep) = deps[node].get(top.1) else {
                marks[node] = Mark::Visited;
                ordered.push(&formulas[node]);
                stack.pop();
                continue;
            };
            top.1 += 1;

            match marks[dep] {
                Mark::Unvisited => {
                    marks[dep] = Mark::Visiting;
                    stack.push((dep, 0));
                }
                Mark::Visiting => {
                    let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                    let mut path: Vec<&str> = stack[start..]
                        .iter()
                        .map(|(n, _)| formulas[*n].id.as_str())
                        .collect();
                    path.push(formulas[dep].id.as_str());

                    sink.emit(
                        Diagnostic::new(
                            DiagnosticKind::CircularDependency,
                            format!("Circular dependency: {}", path.join(" -> ")),
                        )
                        .for_formula(formulas[node].id.clone()),
                    );
                }
                Mark::Visited => {}
            }
        }
    }

    tracing::debug!(count = ordered.len(), "resolved formula order");
    ordered
}

/// Groups of formulas that depend on each other (including self-references),
/// each group listed in declaration order.
pub fn cycle_groups(formulas: &[Formula]) -> Vec<Vec<String>> {
    let deps = dependency_indices(formulas);

    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..formulas.len()).map(|i| graph.add_node(i)).collect();
    for (i, targets) in deps.iter().enumerate() {
        for &target in targets {
            graph.add_edge(nodes[target], nodes[i], ());
        }
    }

    let mut groups: Vec<Vec<usize>> = tarjan_scc(&graph)
        .into_iter()
        .map(|component| {
            let mut members: Vec<usize> = component.iter().map(|n| graph[*n]).collect();
            members.sort_unstable();
            members
        })
        .filter(|members| members.len() > 1 || deps[members[0]].contains(&members[0]))
        .collect();
    groups.sort_by_key(|members| members[0]);

    groups
        .into_iter()
        .map(|members| members.into_iter().map(|i| formulas[i].id.clone()).collect())
        .collect()
}
