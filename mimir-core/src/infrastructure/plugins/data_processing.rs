// mimir-core/src/infrastructure/plugins/data_processing.rs

use crate::domain::error::DomainError;
use crate::ports::cancellation::CancellationToken;
use crate::ports::context::ContextStore;
use crate::ports::plugin::{Plugin, PluginCategory};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// `Data_Processing.multiply`: doubles (or scales by `factor`) the numeric
/// field named by `field` on the object in `input` (§8 scenario 1 uses the
/// default `factor=2` to turn `{"x":2}` into `{"x":4}`).
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiplyPlugin;

#[async_trait]
impl Plugin for MultiplyPlugin {
    fn category(&self) -> PluginCategory {
        PluginCategory::DataProcessing
    }

    fn name(&self) -> &str {
        "multiply"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["field"],
            "properties": {
                "input": {"type": "object"},
                "input_key": {"type": "string"},
                "field": {"type": "string"},
                "factor": {"type": "number"}
            }
        })
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), DomainError> {
        crate::domain::validation::validate(&json!(config), &self.input_schema()).map_err(|reason| {
            DomainError::InvalidConfig {
                plugin: self.id(),
                reason,
            }
        })?;
        if !config.contains_key("input") && !config.contains_key("input_key") {
            return Err(DomainError::InvalidConfig {
                plugin: self.id(),
                reason: "one of 'input' or 'input_key' is required".to_string(),
            });
        }
        Ok(())
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        context: Arc<dyn ContextStore>,
        namespace: &str,
        actor: &str,
        _cancel: CancellationToken,
    ) -> Result<Value, DomainError> {
        let fetched;
        let input = if let Some(obj) = config.get("input").and_then(|v| v.as_object()) {
            obj
        } else {
            let key = config
                .get("input_key")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DomainError::InvalidConfig {
                    plugin: self.id(),
                    reason: "missing 'input' or 'input_key'".to_string(),
                })?;
            fetched = context
                .get(namespace, actor, key)
                .await?
                .ok_or_else(|| DomainError::PluginFailed {
                    plugin: self.id(),
                    reason: format!("context key '{key}' not found"),
                })?;
            fetched.as_object().ok_or_else(|| DomainError::PluginFailed {
                plugin: self.id(),
                reason: format!("context key '{key}' is not an object"),
            })?
        };
        let field = config
            .get("field")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DomainError::InvalidConfig {
                plugin: self.id(),
                reason: "missing 'field'".to_string(),
            })?;
        let factor = config.get("factor").and_then(|v| v.as_f64()).unwrap_or(2.0);
        let current = input
            .get(field)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| DomainError::PluginFailed {
                plugin: self.id(),
                reason: format!("field '{field}' is not numeric"),
            })?;

        let mut out = input.clone();
        out.insert(field.to_string(), json!(current * factor));
        Ok(Value::Object(out))
    }
}

/// `Data_Processing.noop`: does nothing and returns `null`. Used for
/// condition-only or iterate-only steps that need a `plugin` field but no
/// real work (`StepNode::plugin` is required, not optional).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlugin;

#[async_trait]
impl Plugin for NoopPlugin {
    fn category(&self) -> PluginCategory {
        PluginCategory::DataProcessing
    }

    fn name(&self) -> &str {
        "noop"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn validate_config(&self, _config: &HashMap<String, Value>) -> Result<(), DomainError> {
        Ok(())
    }

    async fn execute(
        &self,
        _config: &HashMap<String, Value>,
        _context: Arc<dyn ContextStore>,
        _namespace: &str,
        _actor: &str,
        _cancel: CancellationToken,
    ) -> Result<Value, DomainError> {
        Ok(Value::Null)
    }
}
