// mimir-core/src/application/parser.rs
//
// The Pipeline Parser (§4.C): YAML -> validated AST -> control graph.
// Errors are collected rather than thrown on the first one, so a caller
// (the CLI's `validate` command, for instance) can report every problem
// in one pass instead of a fix-one-rerun loop.

use crate::domain::error::DomainError;
use crate::domain::pipeline::ast::PipelineDef;
use crate::domain::pipeline::graph::ControlGraph;
use crate::infrastructure::error::InfrastructureError;
use tracing::instrument;

/// A parsed pipeline: the raw AST plus its derived control graph. Both
/// are kept because the AST carries fields (description, error_policy)
/// the flat graph drops.
#[derive(Debug, Clone)]
pub struct ParsedPipeline {
    pub def: PipelineDef,
    pub graph: ControlGraph,
}

/// Parses and validates a pipeline, collecting every error found rather
/// than stopping at the first one (§4.C step "errors are collected, not
/// thrown").
#[instrument(skip(yaml))]
pub fn parse_pipeline(yaml: &str) -> (Option<ParsedPipeline>, Vec<DomainError>) {
    let mut errors = Vec::new();

    let def: PipelineDef = match serde_yaml::from_str(yaml) {
        Ok(def) => def,
        Err(e) => {
            errors.push(DomainError::PipelineInvalid(format!("YAML error: {e}")));
            return (None, errors);
        }
    };

    if def.steps.is_empty() {
        errors.push(DomainError::PipelineInvalid(
            "pipeline has no steps".to_string(),
        ));
    }

    for step in def.all_steps() {
        if step.plugin.trim().is_empty() {
            errors.push(DomainError::PipelineInvalid(format!(
                "step '{}' has an empty plugin id",
                step.name
            )));
        }
        if let Some(cond) = &step.condition
            && cond.expression.trim().is_empty()
        {
            errors.push(DomainError::PipelineInvalid(format!(
                "step '{}' has an empty condition expression",
                step.name
            )));
        }
    }

    if !errors.is_empty() {
        return (None, errors);
    }

    match ControlGraph::build(&def.steps) {
        Ok(graph) => (Some(ParsedPipeline { def, graph }), errors),
        Err(e) => {
            errors.push(e);
            (None, errors)
        }
    }
}

/// Loads and parses a pipeline from a YAML file on disk.
pub async fn load_pipeline_file(path: &std::path::Path) -> Result<(Option<ParsedPipeline>, Vec<DomainError>), InfrastructureError> {
    let yaml = tokio::fs::read_to_string(path).await?;
    Ok(parse_pipeline(&yaml))
}
