//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline given to a root context when the caller does not supply one.
    pub default_timeout_ms: u64,

    /// Execution parallelism. Scatter and join producers must respect this.
    pub max_parallel_tasks: usize,

    /// Emit one `info` event per step instead of only per invocation.
    pub trace_invocations: bool,

    /// Optional cap on rows accepted by any single stream pipeline.
    pub max_stream_items: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_parallel_tasks: 4,
            trace_invocations: false,
            max_stream_items: None,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    ///
    /// - `PLEXUS_DEFAULT_TIMEOUT_MS`
    /// - `PLEXUS_MAX_PARALLEL_TASKS`
    /// - `PLEXUS_TRACE_INVOCATIONS` (`1`/`true`)
    /// - `PLEXUS_MAX_STREAM_ITEMS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("PLEXUS_DEFAULT_TIMEOUT_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.default_timeout_ms = v;
            }
        }

        if let Ok(s) = std::env::var("PLEXUS_MAX_PARALLEL_TASKS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_parallel_tasks = v;
            }
        }

        if let Ok(s) = std::env::var("PLEXUS_TRACE_INVOCATIONS") {
            cfg.trace_invocations = matches!(s.trim(), "1" | "true" | "TRUE" | "yes");
        }

        if let Ok(s) = std::env::var("PLEXUS_MAX_STREAM_ITEMS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_stream_items = Some(v);
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms == 0 {
            return Err(Error::Config("default_timeout_ms must be > 0".into()));
        }
        if self.max_parallel_tasks == 0 {
            return Err(Error::Config("max_parallel_tasks must be > 0".into()));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_timeout().as_secs(), 30);
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let cfg = EngineConfig {
            max_parallel_tasks: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"max_parallel_tasks": 8}"#).expect("parse config");
        assert_eq!(cfg.max_parallel_tasks, 8);
        assert_eq!(cfg.default_timeout_ms, 30_000);
    }
}
