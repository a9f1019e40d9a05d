// mimir-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

/// Error kinds raised by pure domain logic: parsing, the control graph,
/// condition evaluation, work-task transitions, and access control.
///
/// Each variant corresponds to one of the semantic error kinds in the
/// engine's error handling design; `kind()` returns the stable name callers
/// (and the CLI) match on rather than the message text.
#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error("Invalid plugin config for '{plugin}': {reason}")]
    #[diagnostic(
        code(mimir::domain::invalid_config),
        help("Check the step's `config` block against the plugin's input_schema.")
    )]
    InvalidConfig { plugin: String, reason: String },

    #[error("Plugin not found: '{0}'")]
    #[diagnostic(code(mimir::domain::plugin_not_found))]
    PluginNotFound(String),

    #[error("Value at {namespace}.{key} failed schema validation: {reason}")]
    #[diagnostic(code(mimir::domain::schema_validation))]
    SchemaValidation {
        namespace: String,
        key: String,
        reason: String,
    },

    #[error("Access denied: actor '{actor}' lacks '{action}' on '{namespace}.{key}'")]
    #[diagnostic(code(mimir::domain::access_denied))]
    AccessDenied {
        actor: String,
        action: String,
        namespace: String,
        key: String,
    },

    #[error("Condition expression error: {0}")]
    #[diagnostic(
        code(mimir::domain::expr_error),
        help("Check operand types and division by zero.")
    )]
    ExprError(String),

    #[error("Control graph contains a cycle not passing through an iterate: {0}")]
    #[diagnostic(code(mimir::domain::cycle_detected), help("Check your `jump_target` edges."))]
    CycleDetected(String),

    #[error("Jump target unknown: label '{0}' does not exist")]
    #[diagnostic(code(mimir::domain::jump_target_unknown))]
    JumpTargetUnknown(String),

    #[error("Step '{0}' timed out")]
    #[diagnostic(code(mimir::domain::timeout))]
    Timeout(String),

    #[error("Operation cancelled")]
    #[diagnostic(code(mimir::domain::cancelled))]
    Cancelled,

    #[error("Plugin '{plugin}' failed: {reason}")]
    #[diagnostic(code(mimir::domain::plugin_failed))]
    PluginFailed { plugin: String, reason: String },

    #[error("LLM fallback unavailable: {0}")]
    #[diagnostic(code(mimir::domain::llm_unavailable))]
    LlmUnavailable(String),

    #[error("Pipeline definition invalid: {0}")]
    #[diagnostic(code(mimir::domain::pipeline_invalid))]
    PipelineInvalid(String),

    #[error("Duplicate plugin registration for '{0}'")]
    #[diagnostic(code(mimir::domain::duplicate_plugin))]
    DuplicatePlugin(String),

    #[error("Schedule not found: '{0}'")]
    #[diagnostic(code(mimir::domain::schedule_not_found))]
    ScheduleNotFound(uuid::Uuid),

    #[error("Pipeline not found: '{0}'")]
    #[diagnostic(code(mimir::domain::pipeline_not_found))]
    PipelineNotFound(String),

    #[error("Plugin '{plugin}' panicked: {message}")]
    #[diagnostic(
        code(mimir::domain::plugin_panicked),
        help("This is a bug in the plugin; the run is aborted rather than left in an inconsistent state.")
    )]
    PluginPanicked { plugin: String, message: String },
}

impl DomainError {
    /// The stable, machine-readable error kind from the engine's error
    /// handling design (§7), independent of the human-readable message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::PluginNotFound(_) => "PLUGIN_NOT_FOUND",
            Self::SchemaValidation { .. } => "SCHEMA_VALIDATION",
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::ExprError(_) => "EXPR_ERROR",
            Self::CycleDetected(_) => "CYCLE_DETECTED",
            Self::JumpTargetUnknown(_) => "JUMP_TARGET_UNKNOWN",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::PluginFailed { .. } => "PLUGIN_FAILED",
            Self::LlmUnavailable(_) => "LLM_UNAVAILABLE",
            Self::PipelineInvalid(_) => "PIPELINE_INVALID",
            Self::DuplicatePlugin(_) => "DUPLICATE_PLUGIN",
            Self::ScheduleNotFound(_) => "SCHEDULE_NOT_FOUND",
            Self::PipelineNotFound(_) => "PIPELINE_NOT_FOUND",
            Self::PluginPanicked { .. } => "PLUGIN_PANICKED",
        }
    }
}
