// mimir-core/src/lib.rs

#![allow(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::perf)]

// --- HEXAGONAL MODULES ---

// 1. Ports (Interfaces / Traits)
// The contracts the engine depends on: plugins, the context store, durable
// storage, and the LLM fallback used by schema inference.
pub mod ports;

// 2. Domain (core business rules)
// Pipeline AST, control graph, condition expressions, work tasks, cron
// schedules, access policies, schema inference. Depends on nothing else.
pub mod domain;

// 3. Infrastructure (Adapters)
// Concrete implementations: the filesystem-backed JSON store, the
// in-process context service, conformance plugins, config loading.
// Depends on domain and ports.
pub mod infrastructure;

// 4. Application (Use Cases)
// Orchestration: parser, registry, executor, dispatcher, scheduler, schema
// inference service. Depends on domain, infra, and ports.
pub mod application;

// --- GLOBAL ERROR TYPE ---
pub mod error;

pub use error::MimirError;
