// mimir-core/src/ports/mod.rs
//
// The contracts the application layer depends on, without knowing how
// they're implemented: a plugin and its registry dispatch, the context
// store, durable record/binary storage, and the LLM fallback used by
// schema inference. Infrastructure provides the adapters; application
// wires them together.

pub mod cancellation;
pub mod context;
pub mod llm;
pub mod plugin;
pub mod storage;

pub use cancellation::{CancellationSource, CancellationToken};
pub use context::{ContextStore, FileType};
pub use llm::{ChatMessage, CompletionRequest, CompletionResponse, LLMClient};
pub use plugin::{Plugin, PluginCategory};
pub use storage::{BinaryStore, RecordStore};
