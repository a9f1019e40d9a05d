// mimir-core/src/infrastructure/plugins/output.rs

use crate::domain::error::DomainError;
use crate::ports::cancellation::CancellationToken;
use crate::ports::context::ContextStore;
use crate::ports::plugin::{Plugin, PluginCategory};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// `Output.stdout`: prints `config.value` (or the whole config if no
/// `value` key is present) and passes it through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutOutputPlugin;

#[async_trait]
impl Plugin for StdoutOutputPlugin {
    fn category(&self) -> PluginCategory {
        PluginCategory::Output
    }

    fn name(&self) -> &str {
        "stdout"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn validate_config(&self, _config: &HashMap<String, Value>) -> Result<(), DomainError> {
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
        let value = if let Some(v) = config.get("value") {
            v.clone()
        } else if let Some(key) = config.get("value_key").and_then(|v| v.as_str()) {
            context.get(namespace, actor, key).await?.unwrap_or(Value::Null)
        } else {
            json!(config)
        };
        println!("{value}");
        info!(%value, "Output.stdout");
        Ok(value)
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
    async fn passes_value_through() {
        let plugin = StdoutOutputPlugin;
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonRecordStore::new(dir.keep()));
        let ctx: Arc<dyn ContextStore> = Arc::new(ContextService::new(Default::default(), store.clone(), store));
        let (_source, token) = CancellationSource::new();
        let mut config = HashMap::new();
        config.insert("value".to_string(), json!({"x": 4}));
        let result = plugin.execute(&config, ctx, "run", "system", token).await.unwrap();
        assert_eq!(result, json!({"x": 4}));
    }
}
