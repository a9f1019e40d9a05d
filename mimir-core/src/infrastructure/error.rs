// mimir-core/src/infrastructure/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum InfrastructureError {
    // --- FILESYSTEM (IO) ---
    #[error("File System Error: {0}")]
    #[diagnostic(
        code(mimir::infra::io),
        help("Check file permissions or path validity.")
    )]
    Io(#[from] std::io::Error),

    // --- YAML / JSON ---
    #[error("YAML Parsing Error: {0}")]
    #[diagnostic(code(mimir::infra::yaml), help("Check your YAML syntax (indentation, types)."))]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON Error: {0}")]
    #[diagnostic(code(mimir::infra::json))]
    JsonError(#[from] serde_json::Error),

    // --- CONFIG ---
    #[error("Configuration Error: {0}")]
    #[diagnostic(code(mimir::infra::config))]
    ConfigError(String),

    #[error("Project configuration not found at '{0}'")]
    #[diagnostic(code(mimir::infra::config_missing))]
    ConfigNotFound(String),

    // --- PERSISTENCE ---
    #[error("Persistence error on '{record}': {reason}")]
    #[diagnostic(
        code(mimir::infra::persistence),
        help("Check the storage base path and disk permissions.")
    )]
    Persistence { record: String, reason: String },

    #[error("Record not found: '{0}'")]
    #[diagnostic(code(mimir::infra::not_found))]
    NotFound(String),
}
