// mimir-core/src/infrastructure/context/mod.rs
//
// Concrete `ContextStore` (§4.A): a read/write lock per namespace, one
// mutex for the audit log, one for the performance-metrics map — kept
// strictly synchronous and in-lock per the design note that moving audit
// logging to a background worker would break ordering guarantees (§9).
// Binary values above `binary_inline_threshold` are pushed to the
// `BinaryStore` and the namespace holds only a `referenced` descriptor.

use crate::domain::access::{Action, PermissionManager};
use crate::domain::error::DomainError;
use crate::domain::validation;
use crate::ports::context::{AuditEntry, ContextStore, FileType};
use crate::ports::storage::{BinaryStore, RecordStore};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, instrument};

const DEFAULT_INLINE_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Default, Clone, Copy)]
struct KeyMetrics {
    access_count: u64,
    size_bytes: usize,
}

type Namespace = HashMap<String, Value>;

pub struct ContextService {
    namespaces: RwLock<HashMap<String, Arc<RwLock<Namespace>>>>,
    audit_log: Mutex<Vec<AuditEntry>>,
    metrics: Mutex<HashMap<(String, String), KeyMetrics>>,
    permissions: PermissionManager,
    schemas: RwLock<HashMap<String, Value>>,
    binary_store: Arc<dyn BinaryStore>,
    binary_inline_threshold: usize,
    record_store: Arc<dyn RecordStore>,
}

/// Namespace snapshots persisted via `save_to_storage` live in this
/// `RecordStore` collection, keyed by namespace name.
const CONTEXT_SNAPSHOT_COLLECTION: &str = "context_namespaces";

impl ContextService {
    pub fn new(permissions: PermissionManager, binary_store: Arc<dyn BinaryStore>, record_store: Arc<dyn RecordStore>) -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            audit_log: Mutex::new(Vec::new()),
            metrics: Mutex::new(HashMap::new()),
            permissions,
            schemas: RwLock::new(HashMap::new()),
            binary_store,
            binary_inline_threshold: DEFAULT_INLINE_THRESHOLD,
            record_store,
        }
    }

    pub fn register_schema(&self, schema_id: impl Into<String>, schema: Value) {
        self.schemas
            .write()
            .expect("schema registry lock poisoned")
            .insert(schema_id.into(), schema);
    }

    fn require(&self, actor: &str, ns: &str, key: &str, action: Action) -> Result<(), DomainError> {
        let resource = format!("{ns}.{key}");
        if self.permissions.is_allowed(actor, &resource, action) {
            Ok(())
        } else {
            Err(DomainError::AccessDenied {
                actor: actor.to_string(),
                action: format!("{action:?}"),
                namespace: ns.to_string(),
                key: key.to_string(),
            })
        }
    }

    fn namespace_handle(&self, ns: &str) -> Arc<RwLock<Namespace>> {
        if let Some(existing) = self.namespaces.read().expect("namespace lock poisoned").get(ns) {
            return Arc::clone(existing);
        }
        let mut write_guard = self.namespaces.write().expect("namespace lock poisoned");
        Arc::clone(
            write_guard
                .entry(ns.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(HashMap::new()))),
        )
    }

    fn record_audit(&self, ns: &str, actor: &str, op: &str, key: Option<&str>, old: Option<Value>, new: Option<Value>) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            actor: actor.to_string(),
            op: op.to_string(),
            namespace: ns.to_string(),
            key: key.map(str::to_string),
            old,
            new,
        };
        self.audit_log.lock().expect("audit log lock poisoned").push(entry);
    }

    fn touch_metrics(&self, ns: &str, key: &str, size_bytes: Option<usize>) {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        let entry = metrics.entry((ns.to_string(), key.to_string())).or_default();
        entry.access_count += 1;
        if let Some(size) = size_bytes {
            entry.size_bytes = size;
        }
    }

    fn binary_descriptor(&self, ns: &str, key: &str, bytes: &[u8], mime: &str) -> Value {
        if bytes.len() > self.binary_inline_threshold {
            json!({
                "__type__": "binary",
                "data_location": "referenced",
                "storage_reference": {"namespace": ns, "key": key},
                "format": mime,
            })
        } else {
            json!({
                "__type__": "binary",
                "format": mime,
                "encoding": "base64",
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            })
        }
    }

    fn storage_key(ns: &str, key: &str) -> String {
        format!("{ns}:{key}")
    }
}

#[async_trait]
impl ContextStore for ContextService {
    #[instrument(skip(self, value))]
    async fn set(&self, ns: &str, actor: &str, key: &str, value: Value, schema_id: Option<&str>) -> Result<(), DomainError> {
        self.require(actor, ns, key, Action::Write)?;
        if let Some(schema_id) = schema_id {
            let schemas = self.schemas.read().expect("schema registry lock poisoned");
            if let Some(schema) = schemas.get(schema_id) {
                validation::validate(&value, schema).map_err(|reason| DomainError::SchemaValidation {
                    namespace: ns.to_string(),
                    key: key.to_string(),
                    reason,
                })?;
            }
        }

        let handle = self.namespace_handle(ns);
        let mut guard = handle.write().expect("namespace lock poisoned");
        let old = guard.insert(key.to_string(), value.clone());
        let op = if old.is_some() { "update" } else { "create" };
        drop(guard);

        self.touch_metrics(ns, key, Some(value.to_string().len()));
        self.record_audit(ns, actor, op, Some(key), old, Some(value));
        debug!(ns, key, op, "context value set");
        Ok(())
    }

    async fn get(&self, ns: &str, actor: &str, key: &str) -> Result<Option<Value>, DomainError> {
        self.require(actor, ns, key, Action::Read)?;
        let handle = self.namespace_handle(ns);
        let guard = handle.read().expect("namespace lock poisoned");
        let value = guard.get(key).cloned();
        drop(guard);
        self.touch_metrics(ns, key, None);
        Ok(value)
    }

    async fn delete(&self, ns: &str, actor: &str, key: Option<&str>) -> Result<(), DomainError> {
        match key {
            Some(key) => {
                self.require(actor, ns, key, Action::Delete)?;
                let handle = self.namespace_handle(ns);
                let mut guard = handle.write().expect("namespace lock poisoned");
                let old = guard.remove(key);
                drop(guard);
                self.record_audit(ns, actor, "delete", Some(key), old, None);
            }
            None => {
                self.require(actor, ns, "*", Action::Delete)?;
                let handle = self.namespace_handle(ns);
                let mut guard = handle.write().expect("namespace lock poisoned");
                guard.clear();
                drop(guard);
                self.record_audit(ns, actor, "delete_namespace", None, None, None);
            }
        }
        Ok(())
    }

    async fn set_many(&self, ns: &str, actor: &str, items: Vec<(String, Value)>, overwrite: bool) -> Result<(), DomainError> {
        self.require(actor, ns, "*", Action::Write)?;
        let handle = self.namespace_handle(ns);
        let mut guard = handle.write().expect("namespace lock poisoned");
        if !overwrite {
            for (key, _) in &items {
                if guard.contains_key(key) {
                    return Err(DomainError::SchemaValidation {
                        namespace: ns.to_string(),
                        key: key.clone(),
                        reason: "key already exists and overwrite=false".to_string(),
                    });
                }
            }
        }
        let mut olds = Vec::with_capacity(items.len());
        for (key, value) in &items {
            olds.push(guard.insert(key.clone(), value.clone()));
        }
        drop(guard);
        for ((key, value), old) in items.into_iter().zip(olds) {
            self.record_audit(ns, actor, "set_many", Some(&key), old, Some(value));
        }
        Ok(())
    }

    async fn append_to_list(&self, ns: &str, actor: &str, key: &str, item: Value) -> Result<(), DomainError> {
        self.require(actor, ns, key, Action::Write)?;
        let handle = self.namespace_handle(ns);
        let mut guard = handle.write().expect("namespace lock poisoned");
        let old = guard.get(key).cloned();
        let mut list = match &old {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(DomainError::SchemaValidation {
                    namespace: ns.to_string(),
                    key: key.to_string(),
                    reason: format!("cannot append to non-list value {other}"),
                });
            }
        };
        list.push(item);
        let new_value = Value::Array(list);
        guard.insert(key.to_string(), new_value.clone());
        drop(guard);
        self.record_audit(ns, actor, "append", Some(key), old, Some(new_value));
        Ok(())
    }

    async fn copy(
        &self,
        src_ns: &str,
        src_key: &str,
        dst_ns: &str,
        dst_key: &str,
        actor: &str,
        remove_source: bool,
        overwrite: bool,
    ) -> Result<(), DomainError> {
        self.require(actor, src_ns, src_key, Action::Read)?;
        self.require(actor, dst_ns, dst_key, Action::Write)?;

        // Lock namespaces in a fixed global (lexicographic) order to avoid
        // deadlocking against a concurrent copy in the opposite direction.
        let (first_ns, second_ns) = if src_ns <= dst_ns { (src_ns, dst_ns) } else { (dst_ns, src_ns) };
        let first_handle = self.namespace_handle(first_ns);
        let second_handle = if first_ns == second_ns {
            Arc::clone(&first_handle)
        } else {
            self.namespace_handle(second_ns)
        };

        let value = {
            let src_handle = if src_ns == first_ns { &first_handle } else { &second_handle };
            let guard = src_handle.read().expect("namespace lock poisoned");
            guard
                .get(src_key)
                .cloned()
                .ok_or_else(|| DomainError::SchemaValidation {
                    namespace: src_ns.to_string(),
                    key: src_key.to_string(),
                    reason: "source key not found".to_string(),
                })?
        };

        {
            let dst_handle = if dst_ns == first_ns { &first_handle } else { &second_handle };
            let mut guard = dst_handle.write().expect("namespace lock poisoned");
            if !overwrite && guard.contains_key(dst_key) {
                return Err(DomainError::SchemaValidation {
                    namespace: dst_ns.to_string(),
                    key: dst_key.to_string(),
                    reason: "destination key already exists and overwrite=false".to_string(),
                });
            }
            guard.insert(dst_key.to_string(), value.clone());
        }
        self.record_audit(dst_ns, actor, "copy", Some(dst_key), None, Some(value));

        if remove_source {
            let src_handle = if src_ns == first_ns { &first_handle } else { &second_handle };
            let mut guard = src_handle.write().expect("namespace lock poisoned");
            let old = guard.remove(src_key);
            drop(guard);
            self.record_audit(src_ns, actor, "delete", Some(src_key), old, None);
        }
        Ok(())
    }

    async fn load_file(
        &self,
        path: &str,
        file_type: FileType,
        ns: &str,
        key: &str,
        actor: &str,
        binary_mime: Option<&str>,
    ) -> Result<(), DomainError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DomainError::PluginFailed {
                plugin: "ContextService.load_file".to_string(),
                reason: e.to_string(),
            })?;
        let value = match file_type {
            FileType::Json => serde_json::from_slice(&bytes).map_err(|e| DomainError::SchemaValidation {
                namespace: ns.to_string(),
                key: key.to_string(),
                reason: format!("invalid JSON in {path}: {e}"),
            })?,
            FileType::Binary => self.binary_descriptor(ns, key, &bytes, binary_mime.unwrap_or("application/octet-stream")),
        };
        if file_type == FileType::Binary && bytes.len() > self.binary_inline_threshold {
            self.binary_store
                .save_binary(&Self::storage_key(ns, key), &bytes)
                .await
                .map_err(|e| DomainError::PluginFailed {
                    plugin: "ContextService.load_file".to_string(),
                    reason: e.to_string(),
                })?;
        }
        self.set(ns, actor, key, value, None).await
    }

    async fn save_file(
        &self,
        ns: &str,
        key: &str,
        path: &str,
        file_type: FileType,
        actor: &str,
        create_dirs: bool,
    ) -> Result<(), DomainError> {
        let value = self.get(ns, actor, key).await?.ok_or_else(|| DomainError::SchemaValidation {
            namespace: ns.to_string(),
            key: key.to_string(),
            reason: "key not found".to_string(),
        })?;

        if create_dirs
            && let Some(parent) = std::path::Path::new(path).parent()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| DomainError::PluginFailed {
                plugin: "ContextService.save_file".to_string(),
                reason: e.to_string(),
            })?;
        }

        let bytes = match file_type {
            FileType::Json => serde_json::to_vec_pretty(&value).map_err(|e| DomainError::PluginFailed {
                plugin: "ContextService.save_file".to_string(),
                reason: e.to_string(),
            })?,
            FileType::Binary => self.resolve_binary_bytes(&value).await?,
        };
        tokio::fs::write(path, bytes).await.map_err(|e| DomainError::PluginFailed {
            plugin: "ContextService.save_file".to_string(),
            reason: e.to_string(),
        })
    }

    async fn snapshot(&self, ns: &str) -> Result<HashMap<String, Value>, DomainError> {
        let handle = self.namespace_handle(ns);
        let guard = handle.read().expect("namespace lock poisoned");
        Ok(guard.clone())
    }

    async fn save_binary(&self, ns: &str, actor: &str, key: &str, bytes: Vec<u8>, mime: &str) -> Result<(), DomainError> {
        let descriptor = self.binary_descriptor(ns, key, &bytes, mime);
        if bytes.len() > self.binary_inline_threshold {
            self.binary_store
                .save_binary(&Self::storage_key(ns, key), &bytes)
                .await
                .map_err(|e| DomainError::PluginFailed {
                    plugin: "ContextService.save_binary".to_string(),
                    reason: e.to_string(),
                })?;
        }
        self.set(ns, actor, key, descriptor, None).await
    }

    async fn load_binary(&self, ns: &str, actor: &str, key: &str) -> Result<Option<Vec<u8>>, DomainError> {
        let Some(descriptor) = self.get(ns, actor, key).await? else {
            return Ok(None);
        };
        Ok(Some(self.resolve_binary_bytes(&descriptor).await?))
    }

    /// Snapshots the whole namespace to the `RecordStore` as one JSON
    /// object, so a namespace survives process restarts rather than only
    /// living in the in-memory map `set`/`get` operate on.
    async fn save_to_storage(&self, ns: &str) -> Result<(), DomainError> {
        let snapshot = self.namespace_handle(ns).read().expect("namespace lock poisoned").clone();
        let value = json!(snapshot);
        self.record_store
            .save(CONTEXT_SNAPSHOT_COLLECTION, ns, &value)
            .await
            .map_err(|e| DomainError::PluginFailed {
                plugin: "ContextService.save_to_storage".to_string(),
                reason: e.to_string(),
            })
    }

    /// Restores a previously-saved snapshot, merging it into whatever is
    /// already in memory for `ns` rather than replacing it outright.
    async fn load_from_storage(&self, ns: &str) -> Result<(), DomainError> {
        let stored = self
            .record_store
            .load(CONTEXT_SNAPSHOT_COLLECTION, ns)
            .await
            .map_err(|e| DomainError::PluginFailed {
                plugin: "ContextService.load_from_storage".to_string(),
                reason: e.to_string(),
            })?;
        let Some(value) = stored else { return Ok(()) };
        let Some(entries) = value.as_object() else {
            return Err(DomainError::PluginFailed {
                plugin: "ContextService.load_from_storage".to_string(),
                reason: format!("stored snapshot for namespace '{ns}' is not a JSON object"),
            });
        };
        let handle = self.namespace_handle(ns);
        let mut guard = handle.write().expect("namespace lock poisoned");
        for (key, value) in entries {
            guard.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete_from_storage(&self, ns: &str) -> Result<(), DomainError> {
        self.record_store
            .delete(CONTEXT_SNAPSHOT_COLLECTION, ns)
            .await
            .map_err(|e| DomainError::PluginFailed {
                plugin: "ContextService.delete_from_storage".to_string(),
                reason: e.to_string(),
            })
    }

    async fn audit_log(&self, ns: &str) -> Result<Vec<AuditEntry>, DomainError> {
        Ok(self
            .audit_log
            .lock()
            .expect("audit log lock poisoned")
            .iter()
            .filter(|e| e.namespace == ns)
            .cloned()
            .collect())
    }
}

impl ContextService {
    async fn resolve_binary_bytes(&self, value: &Value) -> Result<Vec<u8>, DomainError> {
        let obj = value.as_object().ok_or_else(|| DomainError::SchemaValidation {
            namespace: String::new(),
            key: String::new(),
            reason: "expected a binary descriptor object".to_string(),
        })?;
        match obj.get("encoding").and_then(|v| v.as_str()) {
            Some("base64") => {
                let data = obj.get("data").and_then(|v| v.as_str()).unwrap_or_default();
                base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| DomainError::SchemaValidation {
                        namespace: String::new(),
                        key: String::new(),
                        reason: format!("invalid base64 binary data: {e}"),
                    })
            }
            _ => {
                let reference = obj
                    .get("storage_reference")
                    .and_then(|v| v.as_object())
                    .ok_or_else(|| DomainError::SchemaValidation {
                        namespace: String::new(),
                        key: String::new(),
                        reason: "binary descriptor missing storage_reference".to_string(),
                    })?;
                let ns = reference.get("namespace").and_then(|v| v.as_str()).unwrap_or_default();
                let key = reference.get("key").and_then(|v| v.as_str()).unwrap_or_default();
                self.binary_store
                    .load_binary(&Self::storage_key(ns, key))
                    .await
                    .map_err(|e| DomainError::PluginFailed {
                        plugin: "ContextService.load_binary".to_string(),
                        reason: e.to_string(),
                    })?
                    .ok_or_else(|| DomainError::SchemaValidation {
                        namespace: ns.to_string(),
                        key: key.to_string(),
                        reason: "referenced binary blob not found".to_string(),
                    })
            }
        }
    }
}
