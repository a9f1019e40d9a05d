// mimir-core/src/domain/pipeline/graph.rs
//
// Flattens the (possibly nested, via `iterate`) step tree into a single
// ordered list addressed by index, resolves `jump_target` labels, and
// detects non-loop cycles (§4.C).
//
// The flat representation is what the executor actually walks: a single
// `step_pointer` into `Vec<FlatStep>`, with `iterate` bodies occupying a
// contiguous sub-range `[body_start, body_end)` right after their
// `IterateStart` entry.

use super::ast::{Branch, Condition, ItemsSource, StepNode};
use crate::domain::error::DomainError;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub enum StepKind {
    Plugin {
        plugin: String,
        config: HashMap<String, serde_json::Value>,
        output: Option<String>,
    },
    IterateStart {
        items: ItemsSource,
        as_name: String,
        index_name: Option<String>,
        body_start: usize,
        body_end: usize,
    },
}

#[derive(Debug, Clone)]
pub struct FlatStep {
    pub index: usize,
    pub name: String,
    pub label: Option<String>,
    pub kind: StepKind,
    pub condition: Option<Condition>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ControlGraph {
    pub steps: Vec<FlatStep>,
    pub labels: HashMap<String, usize>,
}

impl ControlGraph {
    /// Parse + validate a step tree into a flat, cycle-checked graph.
    pub fn build(steps: &[StepNode]) -> Result<Self, DomainError> {
        let mut flat = Vec::new();
        let mut seen_names = HashSet::new();
        let mut labels = HashMap::new();
        flatten_into(steps, &mut flat, &mut seen_names, &mut labels)?;

        for step in &flat {
            if let Some(cond) = &step.condition {
                let jumps = cond.on_true == Branch::Jump || cond.on_false == Branch::Jump;
                match (&cond.jump_target, jumps) {
                    (Some(target), true) if !labels.contains_key(target) => {
                        return Err(DomainError::JumpTargetUnknown(target.clone()));
                    }
                    (None, true) => {
                        return Err(DomainError::PipelineInvalid(format!(
                            "step '{}' has a jump branch with no jump_target",
                            step.name
                        )));
                    }
                    _ => {}
                }
            }
        }

        let graph = ControlGraph { steps: flat, labels };
        graph.check_cycles()?;
        Ok(graph)
    }

    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    fn iterate_ranges(&self) -> Vec<(usize, usize)> {
        self.steps
            .iter()
            .filter_map(|s| match &s.kind {
                StepKind::IterateStart { body_end, .. } => Some((s.index, *body_end)),
                _ => None,
            })
            .collect()
    }

    fn edges(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        if node + 1 < self.steps.len() {
            out.push(node + 1);
        }
        if let Some(cond) = &self.steps[node].condition
            && (cond.on_true == Branch::Jump || cond.on_false == Branch::Jump)
            && let Some(target) = &cond.jump_target
            && let Some(&idx) = self.labels.get(target)
        {
            out.push(idx);
        }
        out
    }

    /// DFS cycle detection. A cycle is permitted only when every node on it
    /// falls inside a single `iterate`'s body range — that is just loop
    /// mechanics, not a genuine control-flow cycle (§4.C, §9).
    fn check_cycles(&self) -> Result<(), DomainError> {
        let n = self.steps.len();
        let mut color = vec![0u8; n];
        let mut stack: Vec<usize> = Vec::new();
        for start in 0..n {
            if color[start] == 0 {
                self.dfs(start, &mut color, &mut stack)?;
            }
        }
        Ok(())
    }

    fn dfs(&self, node: usize, color: &mut [u8], stack: &mut Vec<usize>) -> Result<(), DomainError> {
        color[node] = 1;
        stack.push(node);
        for next in self.edges(node) {
            if color[next] == 1 {
                let pos = stack.iter().position(|&x| x == next).unwrap_or(0);
                let cycle = &stack[pos..];
                if !self.cycle_allowed(cycle) {
                    let names: Vec<String> =
                        cycle.iter().map(|&i| self.steps[i].name.clone()).collect();
                    return Err(DomainError::CycleDetected(names.join(" -> ")));
                }
            } else if color[next] == 0 {
                self.dfs(next, color, stack)?;
            }
        }
        stack.pop();
        color[node] = 2;
        Ok(())
    }

    fn cycle_allowed(&self, cycle: &[usize]) -> bool {
        self.iterate_ranges()
            .iter()
            .any(|&(start, end)| cycle.iter().all(|&i| i >= start && i < end))
    }

    /// A DOT digraph of the control graph, for debugging (§4.C).
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        for step in &self.steps {
            out.push_str(&format!("  n{} [label=\"{}\"];\n", step.index, step.name));
        }
        for step in &self.steps {
            for next in self.edges(step.index) {
                out.push_str(&format!("  n{} -> n{};\n", step.index, next));
            }
        }
        out.push_str("}\n");
        out
    }
}

fn flatten_into(
    steps: &[StepNode],
    flat: &mut Vec<FlatStep>,
    seen_names: &mut HashSet<String>,
    labels: &mut HashMap<String, usize>,
) -> Result<(), DomainError> {
    for step in steps {
        if !seen_names.insert(step.name.clone()) {
            return Err(DomainError::PipelineInvalid(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }

        let index = flat.len();
        if let Some(label) = &step.label {
            if labels.insert(label.clone(), index).is_some() {
                return Err(DomainError::PipelineInvalid(format!(
                    "duplicate label '{}'",
                    label
                )));
            }
        }

        if let Some(iter) = &step.iterate {
            flat.push(FlatStep {
                index,
                name: step.name.clone(),
                label: step.label.clone(),
                kind: StepKind::IterateStart {
                    items: iter.items.clone(),
                    as_name: iter.as_name.clone(),
                    index_name: iter.index.clone(),
                    body_start: index + 1,
                    body_end: 0,
                },
                condition: step.condition.clone(),
                timeout_seconds: step.timeout_seconds,
            });
            flatten_into(&iter.steps, flat, seen_names, labels)?;
            let body_end = flat.len();
            if let StepKind::IterateStart { body_end: be, .. } = &mut flat[index].kind {
                *be = body_end;
            }
        } else {
            flat.push(FlatStep {
                index,
                name: step.name.clone(),
                label: step.label.clone(),
                kind: StepKind::Plugin {
                    plugin: step.plugin.clone(),
                    config: step.config.clone(),
                    output: step.output.clone(),
                },
                condition: step.condition.clone(),
                timeout_seconds: step.timeout_seconds,
            });
        }
    }
    Ok(())
}
