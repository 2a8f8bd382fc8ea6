//! Engine configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is a
//! valid configuration:
//!
//! ```toml
//! max_concurrency = 4
//!
//! [condition]
//! title = "abcxyz-aod-expiry"
//! description = "granted by access-on-demand"
//!
//! [retry]
//! max_retries = 5
//! initial_backoff_ms = 500
//!
//! [store]
//! endpoint = "https://cloudresourcemanager.googleapis.com/v3/"
//! access_token_env = "AOD_ACCESS_TOKEN"
//! timeout_secs = 30
//! ```

use crate::core::error::{AodError, Result};
use crate::core::iam::{ManagedCondition, DEFAULT_CONDITION_TITLE};
use crate::core::retry::RetryConfig;
use crate::core::store::DEFAULT_ENDPOINT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AodConfig {
    /// Managed condition written on granted bindings
    pub condition: ConditionConfig,

    /// Backoff policy for each scope's fetch-reconcile-write cycle
    pub retry: RetryConfig,

    /// Scopes reconciled at the same time
    ///
    /// Must be at least 1.
    pub max_concurrency: usize,

    /// Remote policy store settings
    pub store: StoreConfig,
}

impl Default for AodConfig {
    fn default() -> Self {
        Self {
            condition: ConditionConfig::default(),
            retry: RetryConfig::default(),
            max_concurrency: 4,
            store: StoreConfig::default(),
        }
    }
}

/// Managed condition settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConditionConfig {
    /// Title identifying bindings owned by this engine
    ///
    /// Example: "abcxyz-aod-expiry"
    pub title: String,

    /// Free-form description written on new conditions
    pub description: String,
}

impl Default for ConditionConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_CONDITION_TITLE.to_string(),
            description: String::new(),
        }
    }
}

/// Remote store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Base URL of the Resource Manager API
    pub endpoint: String,

    /// Environment variable holding the bearer token
    pub access_token_env: String,

    /// Per-request timeout, in seconds
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token_env: "AOD_ACCESS_TOKEN".to_string(),
            timeout_secs: 30,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Token from the configured environment variable, if set and non-empty
    pub fn access_token(&self) -> Option<String> {
        std::env::var(&self.access_token_env)
            .ok()
            .filter(|t| !t.is_empty())
    }
}

impl AodConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AodConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AodError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check values that parse but cannot be used
    pub fn validate(&self) -> Result<()> {
        if self.condition.title.trim().is_empty() {
            return Err(AodError::InvalidConfig(
                "condition title must not be empty".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(AodError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn managed_condition(&self) -> ManagedCondition {
        ManagedCondition::new(self.condition.title.clone())
            .with_description(self.condition.description.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() -> Result<()> {
        let config = AodConfig::from_toml_str("")?;
        assert_eq!(config, AodConfig::default());
        assert_eq!(config.condition.title, "abcxyz-aod-expiry");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.store.timeout(), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_partial_document() -> Result<()> {
        let config = AodConfig::from_toml_str(
            r#"
            max_concurrency = 1

            [condition]
            title = "break-glass"

            [retry]
            max_retries = 2
            max_backoff_ms = 1000
            "#,
        )?;
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.condition.title, "break-glass");
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.retry.max_backoff_ms, Some(1000));
        assert_eq!(config.store.endpoint, DEFAULT_ENDPOINT);
        Ok(())
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AodConfig::from_toml_str("max_concurrency = 0").unwrap_err();
        assert!(matches!(err, AodError::InvalidConfig(_)));

        let err = AodConfig::from_toml_str("[condition]\ntitle = \"  \"").unwrap_err();
        assert!(err.to_string().contains("condition title"));

        let err = AodConfig::from_toml_str("[retry]\nattempts = 3").unwrap_err();
        assert!(matches!(err, AodError::Config(_)));
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[condition]\ndescription = \"on call\"").unwrap();

        let config = AodConfig::load(file.path())?;
        let managed = config.managed_condition();
        assert_eq!(managed.title, "abcxyz-aod-expiry");
        assert_eq!(managed.description, "on call");
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let err = AodConfig::load("/nonexistent/aod.toml").unwrap_err();
        assert!(matches!(err, AodError::Io { .. }));
    }
}
