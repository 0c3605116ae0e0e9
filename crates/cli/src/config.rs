use anyhow::{Context, Result};
use orchestrator::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const CONFIG_FILE: &str = "pipeline-engine.toml";
pub const DEFAULT_DB_NAME: &str = "pipeline-engine.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
}

impl CliConfig {
    /// Config written by `init`: a file database next to the config.
    pub fn for_project() -> Self {
        Self {
            engine: EngineConfig::new(format!("sqlite:{DEFAULT_DB_NAME}")),
        }
    }

    /// A missing file falls back to the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn with_database_url(mut self, database_url: Option<String>) -> Self {
        if let Some(url) = database_url {
            self.engine.database_url = url;
        }
        self
    }
}

/// Parse a `key=value` setup abstraction.
pub fn parse_abstraction(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

pub fn collect_abstractions(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CliConfig::load(&dir.path().join(CONFIG_FILE)).await.unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[tokio::test]
    async fn test_load_partial_engine_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[engine]\nmax_retry_wait_secs = 5\n")
            .await
            .unwrap();

        let config = CliConfig::load(&path).await.unwrap();
        assert_eq!(config.engine.max_retry_wait_secs, 5);
        assert_eq!(config.engine.database_url, "sqlite::memory:");
    }

    #[tokio::test]
    async fn test_project_config_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = CliConfig::for_project();
        tokio::fs::write(&path, config.to_toml().unwrap()).await.unwrap();

        let loaded = CliConfig::load(&path).await.unwrap();
        assert_eq!(loaded.engine.database_url, "sqlite:pipeline-engine.db");
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[engine]\nauto_migrate = \"yes\"\n")
            .await
            .unwrap();
        assert!(CliConfig::load(&path).await.is_err());
    }

    #[test]
    fn test_database_url_override() {
        let config = CliConfig::default().with_database_url(Some("sqlite:other.db".to_string()));
        assert_eq!(config.engine.database_url, "sqlite:other.db");
        let config = CliConfig::default().with_database_url(None);
        assert_eq!(config.engine.database_url, "sqlite::memory:");
    }

    #[test]
    fn test_parse_abstraction() {
        assert_eq!(
            parse_abstraction("accountId=acc=1").unwrap(),
            ("accountId".to_string(), "acc=1".to_string())
        );
        assert!(parse_abstraction("accountId").is_err());
        assert!(parse_abstraction("=value").is_err());
    }
}
