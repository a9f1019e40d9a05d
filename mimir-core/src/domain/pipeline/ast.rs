// mimir-core/src/domain/pipeline/ast.rs
//
// The declarative shape of a pipeline, deserialized straight from the YAML
// the caller submits (§6). This module only carries types — validation and
// the derived control graph live in `graph`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level pipeline definition: `{name, description?, steps, version?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    pub steps: Vec<StepNode>,
}

/// Whether the executor aborts the run on the first failed step, or skips
/// it and preserves context (§7, default "abort on first step failure").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    Abort,
    Continue,
}

/// One entry in a pipeline's step list. Nested step lists (under `iterate`)
/// reuse this same type, so step names must be unique across the whole
/// pipeline, not just within one nesting level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepNode {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    /// `"Category.name"`, or the reserved `SERVICE_CALL.ContextService.<method>`
    /// prefix that routes to the context service instead of a plugin.
    pub plugin: String,
    #[serde(default = "default_config")]
    pub config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub iterate: Option<IterateBlock>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_config() -> HashMap<String, serde_json::Value> {
    HashMap::new()
}

/// `{expression, on_true, on_false, jump_target?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub expression: String,
    pub on_true: Branch,
    pub on_false: Branch,
    #[serde(default)]
    pub jump_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Continue,
    Jump,
}

/// `{items, as, index?, steps}`. `items` is either an inline YAML list or a
/// `ctx.ns.key` reference resolved against the run context at execution
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterateBlock {
    pub items: ItemsSource,
    #[serde(rename = "as")]
    pub as_name: String,
    #[serde(default)]
    pub index: Option<String>,
    pub steps: Vec<StepNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemsSource {
    Literal(Vec<serde_json::Value>),
    Reference(String),
}

impl PipelineDef {
    /// Every step name in the pipeline, recursing into `iterate` bodies,
    /// in document order.
    pub fn all_steps(&self) -> Vec<&StepNode> {
        let mut out = Vec::new();
        collect_steps(&self.steps, &mut out);
        out
    }
}

fn collect_steps<'a>(steps: &'a [StepNode], out: &mut Vec<&'a StepNode>) {
    for step in steps {
        out.push(step);
        if let Some(iter) = &step.iterate {
            collect_steps(&iter.steps, out);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_pipeline() {
        let yaml = r#"
name: demo
steps:
  - name: load
    plugin: Input.json
    config:
      json_string: '{"x": 2}'
    output: result
"#;
        let def: PipelineDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.name, "demo");
        assert_eq!(def.steps.len(), 1);
        assert_eq!(def.steps[0].plugin, "Input.json");
    }

    #[test]
    fn parses_iterate_with_literal_items() {
        let yaml = r#"
name: demo
steps:
  - name: loop
    plugin: SERVICE_CALL.ContextService.noop
    iterate:
      items: [1, 2, 3, 4, 5]
      as: item
      steps:
        - name: body
          plugin: Data_Processing.noop
          config: {}
"#;
        let def: PipelineDef = serde_yaml::from_str(yaml).unwrap();
        let iter = def.steps[0].iterate.as_ref().unwrap();
        match &iter.items {
            ItemsSource::Literal(items) => assert_eq!(items.len(), 5),
            ItemsSource::Reference(_) => panic!("expected literal items"),
        }
        assert_eq!(def.all_steps().len(), 2);
    }

    #[test]
    fn parses_iterate_with_reference_items() {
        let yaml = r#"
name: demo
steps:
  - name: loop
    plugin: SERVICE_CALL.ContextService.noop
    iterate:
      items: "ctx.input.rows"
      as: row
      steps: []
"#;
        let def: PipelineDef = serde_yaml::from_str(yaml).unwrap();
        let iter = def.steps[0].iterate.as_ref().unwrap();
        assert!(matches!(iter.items, ItemsSource::Reference(_)));
    }
}
