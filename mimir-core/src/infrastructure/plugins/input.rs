// mimir-core/src/infrastructure/plugins/input.rs

use crate::domain::error::DomainError;
use crate::ports::cancellation::CancellationToken;
use crate::ports::context::ContextStore;
use crate::ports::plugin::{Plugin, PluginCategory};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// `Input.json`: parses a `json_string` config value into structured JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonInputPlugin;

#[async_trait]
impl Plugin for JsonInputPlugin {
    fn category(&self) -> PluginCategory {
        PluginCategory::Input
    }

    fn name(&self) -> &str {
        "json"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["json_string"],
            "properties": {"json_string": {"type": "string"}}
        })
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), DomainError> {
        crate::domain::validation::validate(&json!(config), &self.input_schema()).map_err(|reason| {
            DomainError::InvalidConfig {
                plugin: self.id(),
                reason,
            }
        })
    }

    async fn execute(
        &self,
        config: &HashMap<String, Value>,
        _context: Arc<dyn ContextStore>,
        _namespace: &str,
        _actor: &str,
        _cancel: CancellationToken,
    ) -> Result<Value, DomainError> {
        let raw = config
            .get("json_string")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DomainError::InvalidConfig {
                plugin: self.id(),
                reason: "missing 'json_string'".to_string(),
            })?;
        serde_json::from_str(raw).map_err(|e| DomainError::PluginFailed {
            plugin: self.id(),
            reason: format!("invalid JSON in json_string: {e}"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::infrastructure::context::ContextService;
    use crate::infrastructure::store::JsonRecordStore;
    use crate::ports::cancellation::CancellationSource;
    use tempfile::tempdir;

    #[tokio::test]
    async fn parses_json_string_into_value() {
        let plugin = JsonInputPlugin;
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonRecordStore::new(dir.keep()));
        let ctx: Arc<dyn ContextStore> = Arc::new(ContextService::new(Default::default(), store.clone(), store));
        let (_source, token) = CancellationSource::new();
        let mut config = HashMap::new();
        config.insert("json_string".to_string(), json!(r#"{"x": 2}"#));
        let result = plugin.execute(&config, ctx, "run", "system", token).await.unwrap();
        assert_eq!(result, json!({"x": 2}));
    }

    #[test]
    fn rejects_missing_json_string() {
        let plugin = JsonInputPlugin;
        assert!(plugin.validate_config(&HashMap::new()).is_err());
    }
}
