//! Engine tuning knobs.

use crate::error::{FlowError, Result};
use crate::memory::DEFAULT_SUMMARY_MAX_CHARS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What a node does when one of its parents failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentFailurePolicy {
    /// Run anyway; the failed parent contributes an empty output.
    #[default]
    Proceed,
    /// Do not send; mark the node as a warning.
    Block,
}

/// Engine configuration.
///
/// Every field has a default, so a partial document is valid:
///
/// ```
/// use llm_flow::config::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{"concurrencyLimit": 8}"#).unwrap();
/// assert_eq!(config.concurrency_limit, 8);
/// assert_eq!(config.summary_max_chars, 8000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum node-tasks in flight within one layer.
    pub concurrency_limit: usize,
    /// L2 context budget in characters.
    pub summary_max_chars: usize,
    /// Bound on one backend exchange, body included.
    pub request_timeout_secs: u64,
    /// Bound on the prompt-optimization round trip.
    pub optimize_timeout_secs: u64,
    pub parent_failure: ParentFailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            request_timeout_secs: 120,
            optimize_timeout_secs: 20,
            parent_failure: ParentFailurePolicy::Proceed,
        }
    }
}

impl EngineConfig {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_summary_max_chars(mut self, max_chars: usize) -> Self {
        self.summary_max_chars = max_chars;
        self
    }

    pub fn with_parent_failure(mut self, policy: ParentFailurePolicy) -> Self {
        self.parent_failure = policy;
        self
    }

    pub fn with_optimize_timeout(mut self, timeout: Duration) -> Self {
        self.optimize_timeout_secs = timeout.as_secs();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn optimize_timeout(&self) -> Duration {
        Duration::from_secs(self.optimize_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(FlowError::InvalidConfig(
                "concurrencyLimit must be at least 1".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(FlowError::InvalidConfig(
                "requestTimeoutSecs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| FlowError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "yaml")]
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| FlowError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, picking the format from its extension.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FlowError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            #[cfg(feature = "yaml")]
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            _ => Self::from_json(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency_limit, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.optimize_timeout(), Duration::from_secs(20));
        assert_eq!(config.parent_failure, ParentFailurePolicy::Proceed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json(r#"{"parentFailure": "block"}"#).unwrap();
        assert_eq!(config.parent_failure, ParentFailurePolicy::Block);
        assert_eq!(config.summary_max_chars, DEFAULT_SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = EngineConfig::from_json(r#"{"concurrencyLimit": 0}"#).unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(EngineConfig::from_json(r#"{"parentFailure": "retry"}"#).is_err());
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_yaml() {
        let config = EngineConfig::from_yaml("concurrencyLimit: 5\nsummaryMaxChars: 100\n").unwrap();
        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.summary_max_chars, 100);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = EngineConfig::load("/nonexistent/engine.json").await.unwrap_err();
        assert!(err.to_string().contains("engine.json"));
    }
}
