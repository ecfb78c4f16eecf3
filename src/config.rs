//! Engine Configuration
//!
//! Holds the knobs a run reads when it is created: the default call limit
//! applied to every continuation and the clock the scheduler uses.
//!
//! # Process-wide default
//!
//! The default call limit starts from the `STRIDE_MAX_CALLS` environment
//! variable (a positive number, or `unlimited`) and falls back to 1. It can
//! be changed at runtime with [`set_default_max_calls`].
//!
//! # Example YAML Format
//!
//! ```yaml
//! default_max_calls: 3   # or `null` for unlimited
//! clock: realtime        # or `virtual`
//! ```

use std::fs;
use std::path::Path;
use std::sync::RwLock;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Environment variable consulted for the process-wide call limit.
pub const MAX_CALLS_ENV: &str = "STRIDE_MAX_CALLS";

/// Call limit used when nothing else is configured.
pub const FALLBACK_MAX_CALLS: usize = 1;

static DEFAULT_MAX_CALLS: Lazy<RwLock<Option<usize>>> = Lazy::new(|| {
    let limit = match std::env::var(MAX_CALLS_ENV) {
        Ok(raw) => parse_max_calls(&raw).unwrap_or_else(|e| {
            warn!("Ignoring {}: {}", MAX_CALLS_ENV, e);
            Some(FALLBACK_MAX_CALLS)
        }),
        Err(_) => Some(FALLBACK_MAX_CALLS),
    };
    debug!("Default continuation call limit: {:?}", limit);
    RwLock::new(limit)
});

/// Returns the process-wide default call limit (`None` = unlimited).
pub fn default_max_calls() -> Option<usize> {
    match DEFAULT_MAX_CALLS.read() {
        Ok(limit) => *limit,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

/// Replaces the process-wide default call limit for runs created afterwards.
pub fn set_default_max_calls(limit: Option<usize>) {
    match DEFAULT_MAX_CALLS.write() {
        Ok(mut slot) => *slot = limit,
        Err(poisoned) => *poisoned.into_inner() = limit,
    }
}

/// Parses a call limit: a positive integer, or `unlimited`/`none`.
pub fn parse_max_calls(raw: &str) -> Result<Option<usize>, EngineError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("unlimited") || raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }

    match raw.parse::<usize>() {
        Ok(0) => Err(EngineError::Config(
            "call limit must be at least 1".to_string(),
        )),
        Ok(n) => Ok(Some(n)),
        Err(_) => Err(EngineError::Config(format!(
            "invalid call limit '{}' (expected a number or 'unlimited')",
            raw
        ))),
    }
}

/// How the scheduler measures time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Timers fire in deadline order without waiting.
    #[default]
    Virtual,
    /// Timers wait for their deadline on the wall clock.
    Realtime,
}

/// Settings applied to runs and their scheduler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Call limit given to every new continuation (`None` = unlimited)
    #[serde(default = "default_max_calls")]
    pub default_max_calls: Option<usize>,

    /// Clock used by schedulers built from this config
    #[serde(default)]
    pub clock: ClockMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_calls: default_max_calls(),
            clock: ClockMode::default(),
        }
    }
}

impl EngineConfig {
    /// Loads a config from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        info!("Loading engine config from: {}", path.display());

        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parses a config from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the default call limit, returning the updated config.
    pub fn with_max_calls(mut self, limit: Option<usize>) -> Self {
        self.default_max_calls = limit;
        self
    }

    /// Sets the clock mode, returning the updated config.
    pub fn with_clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.default_max_calls == Some(0) {
            return Err(EngineError::Config(
                "default_max_calls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_max_calls() {
        assert_eq!(parse_max_calls("3").unwrap(), Some(3));
        assert_eq!(parse_max_calls(" 1 ").unwrap(), Some(1));
        assert_eq!(parse_max_calls("unlimited").unwrap(), None);
        assert_eq!(parse_max_calls("NONE").unwrap(), None);
    }

    #[test]
    fn test_parse_max_calls_rejects_garbage() {
        assert!(matches!(parse_max_calls("0"), Err(EngineError::Config(_))));
        assert!(matches!(parse_max_calls("-2"), Err(EngineError::Config(_))));
        assert!(matches!(parse_max_calls("many"), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_from_yaml_full() {
        let config = EngineConfig::from_yaml("default_max_calls: 4\nclock: realtime\n").unwrap();
        assert_eq!(config.default_max_calls, Some(4));
        assert_eq!(config.clock, ClockMode::Realtime);
    }

    #[test]
    fn test_from_yaml_null_means_unlimited() {
        let config = EngineConfig::from_yaml("default_max_calls: null\n").unwrap();
        assert_eq!(config.default_max_calls, None);
        assert_eq!(config.clock, ClockMode::Virtual);
    }

    #[test]
    fn test_from_yaml_rejects_zero() {
        let result = EngineConfig::from_yaml("default_max_calls: 0\n");
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_from_yaml_bad_clock() {
        let result = EngineConfig::from_yaml("clock: sundial\n");
        assert!(matches!(result, Err(EngineError::Yaml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "default_max_calls: 2").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.default_max_calls, Some(2));
    }

    #[test]
    fn test_load_missing_file() {
        let result = EngineConfig::load("/nonexistent/stride.yaml");
        assert!(matches!(result, Err(EngineError::Io(_))));
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_calls(None)
            .with_clock(ClockMode::Realtime);
        assert_eq!(config.default_max_calls, None);
        assert_eq!(config.clock, ClockMode::Realtime);
    }
}
