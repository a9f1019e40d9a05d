// mimir-core/src/application/registry.rs
//
// The Plugin Registry (§4.B): plugins keyed by `Category.name`, plus the
// `SERVICE_CALL.ContextService.<method>` dispatch rule that lets a
// pipeline step call the context service directly instead of going
// through a plugin.

use crate::domain::error::DomainError;
use crate::ports::cancellation::CancellationToken;
use crate::ports::context::{ContextStore, FileType};
use crate::ports::plugin::Plugin;
use base64::Engine;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

const SERVICE_CALL_PREFIX: &str = "SERVICE_CALL.ContextService.";

pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    /// Rejected at startup per §4.B: duplicate `Category.name` registration.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), DomainError> {
        let id = plugin.id();
        if self.plugins.contains_key(&id) {
            return Err(DomainError::DuplicatePlugin(id));
        }
        self.plugins.insert(id, plugin);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(id).cloned()
    }

    pub fn is_service_call(id: &str) -> bool {
        id.starts_with(SERVICE_CALL_PREFIX)
    }

    /// Resolves, validates, and executes a step's plugin, or routes to
    /// the context service when `plugin_id` names a `SERVICE_CALL`.
    #[instrument(skip(self, config, context, cancel))]
    pub async fn dispatch(
        &self,
        plugin_id: &str,
        config: &HashMap<String, Value>,
        context: Arc<dyn ContextStore>,
        namespace: &str,
        actor: &str,
        cancel: CancellationToken,
    ) -> Result<Value, DomainError> {
        if let Some(method) = plugin_id.strip_prefix(SERVICE_CALL_PREFIX) {
            return dispatch_service_call(method, config, context, namespace, actor).await;
        }

        let plugin = self
            .get(plugin_id)
            .ok_or_else(|| DomainError::PluginNotFound(plugin_id.to_string()))?;
        plugin.validate_config(config)?;
        plugin.execute(config, context, namespace, actor, cancel).await
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch_service_call(
    method: &str,
    config: &HashMap<String, Value>,
    context: Arc<dyn ContextStore>,
    namespace: &str,
    actor: &str,
) -> Result<Value, DomainError> {
    let arg = |name: &str| config.get(name);
    let arg_str = |name: &str| arg(name).and_then(|v| v.as_str()).map(str::to_string);
    let require_str = |name: &str| {
        arg_str(name).ok_or_else(|| DomainError::InvalidConfig {
            plugin: format!("SERVICE_CALL.ContextService.{method}"),
            reason: format!("missing required argument '{name}'"),
        })
    };

    match method {
        "set" => {
            let key = require_str("key")?;
            let value = arg("value").cloned().unwrap_or(Value::Null);
            let schema_id = arg_str("schema_id");
            context.set(namespace, actor, &key, value, schema_id.as_deref()).await?;
            Ok(Value::Null)
        }
        "get" => {
            let key = require_str("key")?;
            Ok(context.get(namespace, actor, &key).await?.unwrap_or(Value::Null))
        }
        "delete" => {
            let key = arg_str("key");
            context.delete(namespace, actor, key.as_deref()).await?;
            Ok(Value::Null)
        }
        "append_to_list" => {
            let key = require_str("key")?;
            let item = arg("item").cloned().unwrap_or(Value::Null);
            context.append_to_list(namespace, actor, &key, item).await?;
            Ok(Value::Null)
        }
        "copy" => {
            let src_key = require_str("src_key")?;
            let dst_ns = arg_str("dst_ns").unwrap_or_else(|| namespace.to_string());
            let dst_key = require_str("dst_key")?;
            let remove_source = arg("remove_source").and_then(|v| v.as_bool()).unwrap_or(false);
            let overwrite = arg("overwrite").and_then(|v| v.as_bool()).unwrap_or(false);
            context
                .copy(namespace, &src_key, &dst_ns, &dst_key, actor, remove_source, overwrite)
                .await?;
            Ok(Value::Null)
        }
        "set_many" => {
            let items_obj = arg("items")
                .and_then(|v| v.as_object())
                .ok_or_else(|| DomainError::InvalidConfig {
                    plugin: format!("SERVICE_CALL.ContextService.{method}"),
                    reason: "missing required object argument 'items'".to_string(),
                })?;
            let items = items_obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let overwrite = arg("overwrite").and_then(|v| v.as_bool()).unwrap_or(false);
            context.set_many(namespace, actor, items, overwrite).await?;
            Ok(Value::Null)
        }
        "save_to_storage" => {
            context.save_to_storage(namespace).await?;
            Ok(Value::Null)
        }
        "load_from_storage" => {
            context.load_from_storage(namespace).await?;
            Ok(Value::Null)
        }
        "delete_from_storage" => {
            context.delete_from_storage(namespace).await?;
            Ok(Value::Null)
        }
        "load_file" => {
            let path = require_str("path")?;
            let key = require_str("key")?;
            let file_type = if arg_str("file_type").as_deref() == Some("binary") {
                FileType::Binary
            } else {
                FileType::Json
            };
            let binary_mime = arg_str("binary_mime");
            context
                .load_file(&path, file_type, namespace, &key, actor, binary_mime.as_deref())
                .await?;
            Ok(Value::Null)
        }
        "save_binary" => {
            let key = require_str("key")?;
            let mime = arg_str("mime").unwrap_or_else(|| "application/octet-stream".to_string());
            let data = require_str("data")?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&data)
                .map_err(|e| DomainError::InvalidConfig {
                    plugin: format!("SERVICE_CALL.ContextService.{method}"),
                    reason: format!("invalid base64 in 'data': {e}"),
                })?;
            context.save_binary(namespace, actor, &key, bytes, &mime).await?;
            Ok(Value::Null)
        }
        "load_binary" => {
            let key = require_str("key")?;
            let bytes = context.load_binary(namespace, actor, &key).await?;
            Ok(bytes
                .map(|b| Value::String(base64::engine::general_purpose::STANDARD.encode(b)))
                .unwrap_or(Value::Null))
        }
        "save_file" => {
            let key = require_str("key")?;
            let path = require_str("path")?;
            let file_type = if arg_str("file_type").as_deref() == Some("binary") {
                FileType::Binary
            } else {
                FileType::Json
            };
            let create_dirs = arg("create_dirs").and_then(|v| v.as_bool()).unwrap_or(false);
            context.save_file(namespace, &key, &path, file_type, actor, create_dirs).await?;
            Ok(Value::Null)
        }
        "snapshot" => {
            let snap = context.snapshot(namespace).await?;
            Ok(serde_json::to_value(snap).unwrap_or(Value::Null))
        }
        other => {
            warn!(method = other, "unknown SERVICE_CALL.ContextService method");
            Err(DomainError::PluginNotFound(format!(
                "SERVICE_CALL.ContextService.{other}"
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::access::PermissionManager;
    use crate::infrastructure::context::ContextService;
    use crate::infrastructure::plugins::{JsonInputPlugin, MultiplyPlugin, NoopPlugin, StdoutOutputPlugin};
    use crate::infrastructure::store::JsonRecordStore;
    use crate::ports::cancellation::CancellationSource;
    use serde_json::json;
    use tempfile::tempdir;

    fn context() -> Arc<dyn ContextStore> {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonRecordStore::new(dir.keep()));
        Arc::new(ContextService::new(PermissionManager::default(), store.clone(), store))
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(NoopPlugin)).unwrap();
        let err = registry.register(Arc::new(NoopPlugin)).unwrap_err();
        assert!(matches!(err, DomainError::DuplicatePlugin(_)));
    }

    #[tokio::test]
    async fn unknown_plugin_id_fails() {
        let registry = PluginRegistry::new();
        let (_source, token) = CancellationSource::new();
        let err = registry
            .dispatch("Nope.nothing", &HashMap::new(), context(), "run", "system", token)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PluginNotFound(_)));
    }

    #[tokio::test]
    async fn dispatches_to_registered_plugin() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(JsonInputPlugin)).unwrap();
        registry.register(Arc::new(MultiplyPlugin)).unwrap();
        registry.register(Arc::new(StdoutOutputPlugin)).unwrap();
        let (_source, token) = CancellationSource::new();
        let mut config = HashMap::new();
        config.insert("json_string".to_string(), json!(r#"{"x":2}"#));
        let result = registry
            .dispatch("Input.json", &config, context(), "run", "system", token)
            .await
            .unwrap();
        assert_eq!(result, json!({"x": 2}));
    }

    #[tokio::test]
    async fn service_call_set_and_get_round_trips() {
        let registry = PluginRegistry::new();
        let ctx = context();
        let (_source, token) = CancellationSource::new();
        let mut set_config = HashMap::new();
        set_config.insert("key".to_string(), json!("x"));
        set_config.insert("value".to_string(), json!(42));
        registry
            .dispatch(
                "SERVICE_CALL.ContextService.set",
                &set_config,
                Arc::clone(&ctx),
                "run",
                "system",
                token.clone(),
            )
            .await
            .unwrap();

        let mut get_config = HashMap::new();
        get_config.insert("key".to_string(), json!("x"));
        let result = registry
            .dispatch("SERVICE_CALL.ContextService.get", &get_config, ctx, "run", "system", token)
            .await
            .unwrap();
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn unknown_service_call_method_fails() {
        let registry = PluginRegistry::new();
        let (_source, token) = CancellationSource::new();
        let err = registry
            .dispatch(
                "SERVICE_CALL.ContextService.nonexistent",
                &HashMap::new(),
                context(),
                "run",
                "system",
                token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PluginNotFound(_)));
    }

    #[tokio::test]
    async fn service_call_set_many_writes_every_item() {
        let registry = PluginRegistry::new();
        let ctx = context();
        let (_source, token) = CancellationSource::new();
        let mut config = HashMap::new();
        config.insert("items".to_string(), json!({"a": 1, "b": 2}));
        registry
            .dispatch("SERVICE_CALL.ContextService.set_many", &config, Arc::clone(&ctx), "run", "system", token.clone())
            .await
            .unwrap();

        let mut get_config = HashMap::new();
        get_config.insert("key".to_string(), json!("b"));
        let result = registry
            .dispatch("SERVICE_CALL.ContextService.get", &get_config, ctx, "run", "system", token)
            .await
            .unwrap();
        assert_eq!(result, json!(2));
    }

    #[tokio::test]
    async fn service_call_save_and_load_binary_round_trips_through_base64() {
        let registry = PluginRegistry::new();
        let ctx = context();
        let (_source, token) = CancellationSource::new();
        let mut save_config = HashMap::new();
        save_config.insert("key".to_string(), json!("blob"));
        save_config.insert("mime".to_string(), json!("text/plain"));
        save_config.insert("data".to_string(), json!(base64::engine::general_purpose::STANDARD.encode(b"hello")));
        registry
            .dispatch(
                "SERVICE_CALL.ContextService.save_binary",
                &save_config,
                Arc::clone(&ctx),
                "run",
                "system",
                token.clone(),
            )
            .await
            .unwrap();

        let mut load_config = HashMap::new();
        load_config.insert("key".to_string(), json!("blob"));
        let result = registry
            .dispatch("SERVICE_CALL.ContextService.load_binary", &load_config, ctx, "run", "system", token)
            .await
            .unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(result.as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[tokio::test]
    async fn service_call_delete_from_storage_does_not_error_on_an_unpersisted_namespace() {
        let registry = PluginRegistry::new();
        let (_source, token) = CancellationSource::new();
        registry
            .dispatch("SERVICE_CALL.ContextService.delete_from_storage", &HashMap::new(), context(), "run", "system", token)
            .await
            .unwrap();
    }
}
