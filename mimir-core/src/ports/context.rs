// mimir-core/src/ports/context.rs
//
// The Plugin Context Service contract (§4.A): the sole medium of data
// exchange between steps, and the dispatch target for
// `SERVICE_CALL.ContextService.<method>` steps. Every operation is
// namespace-scoped and actor-carrying so access control and the audit
// log can be enforced uniformly.

use crate::domain::error::DomainError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Json,
    Binary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub actor: String,
    pub op: String,
    pub namespace: String,
    pub key: Option<String>,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn set(
        &self,
        ns: &str,
        actor: &str,
        key: &str,
        value: Value,
        schema_id: Option<&str>,
    ) -> Result<(), DomainError>;

    async fn get(&self, ns: &str, actor: &str, key: &str) -> Result<Option<Value>, DomainError>;

    /// Deletes `key`, or the whole namespace when `key` is `None`.
    async fn delete(&self, ns: &str, actor: &str, key: Option<&str>) -> Result<(), DomainError>;

    /// Atomic per-namespace: either every entry is applied or none are.
    async fn set_many(
        &self,
        ns: &str,
        actor: &str,
        items: Vec<(String, Value)>,
        overwrite: bool,
    ) -> Result<(), DomainError>;

    /// Initialises an empty list if `key` is absent; fails if the existing
    /// value is not a list.
    async fn append_to_list(&self, ns: &str, actor: &str, key: &str, item: Value) -> Result<(), DomainError>;

    async fn copy(
        &self,
        src_ns: &str,
        src_key: &str,
        dst_ns: &str,
        dst_key: &str,
        actor: &str,
        remove_source: bool,
        overwrite: bool,
    ) -> Result<(), DomainError>;

    async fn load_file(
        &self,
        path: &str,
        file_type: FileType,
        ns: &str,
        key: &str,
        actor: &str,
        binary_mime: Option<&str>,
    ) -> Result<(), DomainError>;

    async fn save_file(
        &self,
        ns: &str,
        key: &str,
        path: &str,
        file_type: FileType,
        actor: &str,
        create_dirs: bool,
    ) -> Result<(), DomainError>;

    /// A deep copy of a namespace's contents, for logging.
    async fn snapshot(&self, ns: &str) -> Result<HashMap<String, Value>, DomainError>;

    async fn save_binary(
        &self,
        ns: &str,
        actor: &str,
        key: &str,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<(), DomainError>;

    async fn load_binary(&self, ns: &str, actor: &str, key: &str) -> Result<Option<Vec<u8>>, DomainError>;

    async fn save_to_storage(&self, ns: &str) -> Result<(), DomainError>;
    async fn load_from_storage(&self, ns: &str) -> Result<(), DomainError>;
    async fn delete_from_storage(&self, ns: &str) -> Result<(), DomainError>;

    async fn audit_log(&self, ns: &str) -> Result<Vec<AuditEntry>, DomainError>;
}
