// mimir-core/src/ports/plugin.rs
//
// The plugin contract (§4.B). A plugin is keyed by `Category.name`;
// the registry resolves, validates, and dispatches to it. Plugins
// read/write the run context through `ContextStore`, not by returning a
// free-form blob — the registry merges only what the step's `output` key
// names.

use super::cancellation::CancellationToken;
use super::context::ContextStore;
use crate::domain::error::DomainError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginCategory {
    Input,
    DataProcessing,
    AiModels,
    Output,
}

impl PluginCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::DataProcessing => "Data_Processing",
            Self::AiModels => "AIModels",
            Self::Output => "Output",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Input" => Some(Self::Input),
            "Data_Processing" => Some(Self::DataProcessing),
            "AIModels" => Some(Self::AiModels),
            "Output" => Some(Self::Output),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn category(&self) -> PluginCategory;
    fn name(&self) -> &str;

    /// `"Category.name"`, the registry lookup key.
    fn id(&self) -> String {
        format!("{}.{}", self.category().as_str(), self.name())
    }

    /// JSON-Schema subset describing `config` (§6).
    fn input_schema(&self) -> serde_json::Value;

    fn validate_config(&self, config: &HashMap<String, serde_json::Value>) -> Result<(), DomainError>;

    /// Executes the step. `context`/`actor`/`namespace` give the plugin
    /// access to the run's context store; `cancel` must be observed during
    /// any long-running I/O.
    async fn execute(
        &self,
        config: &HashMap<String, serde_json::Value>,
        context: Arc<dyn ContextStore>,
        namespace: &str,
        actor: &str,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, DomainError>;
}
