//! Dispatcher configuration.
//!
//! Mirrors the load/default shape of `AppConfig` in the Spacedrive core
//! (serde-derived struct, `load`/`load_from` constructors, env overrides)
//! but reads a plain TOML file rather than a GUI app-data JSON file, since
//! this crate has no data directory of its own.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DispatchError, DispatchResult};

/// Top level dispatcher configuration (`core.dispatcher.*` + `submission.*`
/// + per-service catalog entries, see spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Submission watchdog TTL, in seconds (`core.dispatcher.timeout`).
    pub dispatcher_timeout_secs: u64,

    /// Ordered list of stage names (`core.dispatcher.stages`).
    pub stages: Vec<String>,

    /// Maximum extraction depth (`submission.max_extraction_depth`).
    pub max_extraction_depth: u32,

    /// Connection string for the shared store backend.
    pub store_url: String,

    /// `info`, `debug`, `warn`, ... passed to `tracing_subscriber`'s
    /// `EnvFilter` when no `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            dispatcher_timeout_secs: 600,
            stages: vec![
                "filter".to_string(),
                "extract".to_string(),
                "core".to_string(),
                "secondary".to_string(),
                "post".to_string(),
            ],
            max_extraction_depth: 10,
            store_url: "redis://127.0.0.1:6379".to_string(),
            log_level: default_log_level(),
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from a TOML file, falling back to defaults with
    /// env-var overrides (`DISPATCH_STORE_URL`, `DISPATCH_LOG_LEVEL`) when
    /// the file does not exist, matching the teacher's
    /// load-or-default-then-persist shape minus the persistence (this
    /// crate is not interactive and should not surprise operators by
    /// writing files they did not ask for).
    pub fn load_from(path: &Path) -> DispatchResult<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| DispatchError::Config(format!("reading {}: {e}", path.display())))?;
            toml::from_str(&raw)
                .map_err(|e| DispatchError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::warn!(path = %path.display(), "no config file found, using defaults");
            Self::default()
        };

        if let Ok(url) = std::env::var("DISPATCH_STORE_URL") {
            config.store_url = url;
        }
        if let Ok(level) = std::env::var("DISPATCH_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> DispatchResult<()> {
        if self.stages.is_empty() {
            return Err(DispatchError::Config("stages must be non-empty".into()));
        }
        if self.max_extraction_depth == 0 {
            return Err(DispatchError::Config(
                "max_extraction_depth must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(DispatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = DispatcherConfig::load_from(Path::new("/nonexistent/dispatch.toml")).unwrap();
        assert_eq!(cfg.dispatcher_timeout_secs, 600);
    }

    #[test]
    fn empty_stages_rejected() {
        let mut cfg = DispatcherConfig::default();
        cfg.stages.clear();
        assert!(cfg.validate().is_err());
    }
}
