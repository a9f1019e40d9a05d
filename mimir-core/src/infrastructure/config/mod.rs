// mimir-core/src/infrastructure/config/mod.rs
//
// Engine configuration, loaded from environment variables (§6). Follows
// the teacher's env-override pattern (`apply_env_overrides`) rather than
// a config file: the engine has no project manifest of its own, just a
// handful of tunables.

use tracing::{info, instrument, warn};
use validator::Validate;

#[derive(Debug, Clone, Validate)]
pub struct EngineConfig {
    pub context_storage_base_path: String,
    #[validate(range(min = 1, message = "SCHEDULER_CATCHUP_LIMIT must be at least 1"))]
    pub scheduler_catchup_limit: u32,
    #[validate(range(min = 0.0, max = 1.0, message = "FK_MIN_CONFIDENCE must be within [0.0, 1.0]"))]
    pub fk_min_confidence: f64,
    #[validate(range(min = 0.0, max = 1.0, message = "AI_CONFIDENCE_BOOST must be within [0.0, 1.0]"))]
    pub ai_confidence_boost: f64,
    #[validate(range(min = 1, message = "WORKER_POOL_SIZE must be at least 1"))]
    pub worker_pool_size: usize,
    pub step_timeout_default_seconds: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_storage_base_path: "./mimir_data".to_string(),
            scheduler_catchup_limit: 1,
            fk_min_confidence: 0.8,
            ai_confidence_boost: 0.15,
            worker_pool_size: 4,
            step_timeout_default_seconds: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable (with a warning logged
    /// for the latter).
    #[instrument]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CONTEXT_STORAGE_BASE_PATH") {
            info!(value = %val, "overriding context_storage_base_path");
            config.context_storage_base_path = val;
        }
        config.scheduler_catchup_limit = env_parsed("SCHEDULER_CATCHUP_LIMIT", config.scheduler_catchup_limit);
        config.fk_min_confidence = env_parsed("FK_MIN_CONFIDENCE", config.fk_min_confidence);
        config.ai_confidence_boost = env_parsed("AI_CONFIDENCE_BOOST", config.ai_confidence_boost);
        config.worker_pool_size = env_parsed("WORKER_POOL_SIZE", config.worker_pool_size);
        if let Ok(val) = std::env::var("STEP_TIMEOUT_DEFAULT_SECONDS") {
            match val.parse::<u64>() {
                Ok(n) => config.step_timeout_default_seconds = Some(n),
                Err(_) => warn!(value = %val, "ignoring invalid STEP_TIMEOUT_DEFAULT_SECONDS"),
            }
        }

        if let Err(errors) = config.validate() {
            warn!(%errors, "environment overrides produced an out-of-range config, reverting to defaults");
            return Self::default();
        }

        config
    }
}

fn env_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(val) => val.parse().unwrap_or_else(|_| {
            warn!(variable = var, value = %val, "ignoring invalid environment override");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.fk_min_confidence, 0.8);
        assert_eq!(config.scheduler_catchup_limit, 1);
    }

    #[test]
    fn out_of_range_override_reverts_to_defaults() {
        // SAFETY: no other test in this crate reads FK_MIN_CONFIDENCE.
        unsafe {
            std::env::set_var("FK_MIN_CONFIDENCE", "5.0");
        }
        let config = EngineConfig::from_env();
        unsafe {
            std::env::remove_var("FK_MIN_CONFIDENCE");
        }
        assert_eq!(config.fk_min_confidence, EngineConfig::default().fk_min_confidence);
    }
}
