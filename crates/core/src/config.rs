//! # Orchestrator Configuration
//!
//! Persisted as pretty JSON (default `.dossier/config.json`). Missing files
//! fall back to defaults; command-line flags are layered on with
//! [`OrchestratorConfig::merge`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agents::AgentType;
use crate::error::{DossierError, Result};
use crate::models::{LlmProvider, ModelConfig};

pub const DEFAULT_CONFIG_PATH: &str = ".dossier/config.json";

/// Upper bound for `memory_ttl_secs` (ten years)
pub const MAX_MEMORY_TTL_SECS: u64 = 10 * 365 * 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum tasks in flight within one batch
    pub max_concurrency: usize,
    /// Per-task timeout; a timed out task counts as failed
    pub task_timeout_secs: u64,
    /// Buffer size of the lifecycle event channel
    pub event_capacity: usize,
    /// Default lifetime of ancillary memory entries
    pub memory_ttl_secs: u64,
    pub database_path: PathBuf,
    pub global_provider: LlmProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_model: Option<String>,
    /// Base URL for OpenAI-compatible endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// agent type -> model name
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub per_agent_models: HashMap<String, String>,
    /// agent type -> provider
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub per_agent_providers: HashMap<String, LlmProvider>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            task_timeout_secs: 300,
            event_capacity: 256,
            memory_ttl_secs: 86_400,
            database_path: PathBuf::from(".dossier/dossier.db"),
            global_provider: LlmProvider::Anthropic,
            global_model: None,
            base_url: None,
            per_agent_models: HashMap::new(),
            per_agent_providers: HashMap::new(),
        }
    }
}

/// Partial configuration, typically from command-line flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub max_concurrency: Option<usize>,
    pub task_timeout_secs: Option<u64>,
    pub database_path: Option<PathBuf>,
    pub global_provider: Option<LlmProvider>,
    pub global_model: Option<String>,
    pub base_url: Option<String>,
}

impl OrchestratorConfig {
    /// Read the config at `path`; an absent file yields defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DossierError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| DossierError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DossierError::Config(e.to_string()))?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| DossierError::Config(e.to_string()))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| DossierError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn merge(&mut self, other: ConfigOverrides) {
        if let Some(max) = other.max_concurrency {
            self.max_concurrency = max;
        }
        if let Some(secs) = other.task_timeout_secs {
            self.task_timeout_secs = secs;
        }
        if let Some(path) = other.database_path {
            self.database_path = path;
        }
        if let Some(provider) = other.global_provider {
            self.global_provider = provider;
        }
        if other.global_model.is_some() {
            self.global_model = other.global_model;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(DossierError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.task_timeout_secs == 0 {
            return Err(DossierError::Config(
                "task_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.memory_ttl_secs > MAX_MEMORY_TTL_SECS {
            return Err(DossierError::Config(format!(
                "memory_ttl_secs must be at most {}",
                MAX_MEMORY_TTL_SECS
            )));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Clamped to [`MAX_MEMORY_TTL_SECS`] for configs that skipped `validate`
    pub fn memory_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.memory_ttl_secs.min(MAX_MEMORY_TTL_SECS) as i64)
    }

    /// Resolve the model for an agent: per-agent override, then global,
    /// then the provider default
    pub fn model_config_for(&self, agent_type: AgentType) -> ModelConfig {
        let key = agent_type.as_str();

        let provider = self
            .per_agent_providers
            .get(key)
            .copied()
            .unwrap_or(self.global_provider);

        let model = self
            .per_agent_models
            .get(key)
            .or(self.global_model.as_ref())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = if provider.supports_base_url() {
            self.base_url.clone()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("dossier-config-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let config = OrchestratorConfig::load(temp_path("absent.json")).await.unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.max_concurrency, 5);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let path = temp_path("config.json");
        let mut config = OrchestratorConfig::default();
        config.max_concurrency = 2;
        config
            .per_agent_models
            .insert("report_writer".to_string(), "gpt-4o-mini".to_string());
        config.save(&path).await.unwrap();

        let loaded = OrchestratorConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_malformed_file_is_config_error() {
        let path = temp_path("broken.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let err = OrchestratorConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, DossierError::Config(_)));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_memory_ttl_is_bounded() {
        let config = OrchestratorConfig {
            memory_ttl_secs: 10_000_000_000_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DossierError::Config(_))));

        let config = OrchestratorConfig {
            memory_ttl_secs: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(
            config.memory_ttl(),
            chrono::Duration::seconds(MAX_MEMORY_TTL_SECS as i64)
        );

        let config = OrchestratorConfig {
            memory_ttl_secs: MAX_MEMORY_TTL_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"max_concurrency": 3}"#).unwrap();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.task_timeout_secs, 300);
    }

    #[test]
    fn test_merge_and_validate() {
        let mut config = OrchestratorConfig::default();
        config.merge(ConfigOverrides {
            max_concurrency: Some(0),
            global_model: Some("claude-opus".to_string()),
            ..Default::default()
        });
        assert_eq!(config.global_model.as_deref(), Some("claude-opus"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_resolution_order() {
        let mut config = OrchestratorConfig::default();
        config.base_url = Some("http://localhost:8080/v1".to_string());
        config
            .per_agent_providers
            .insert("market_analyst".to_string(), LlmProvider::OpenAI);
        config
            .per_agent_models
            .insert("researcher".to_string(), "claude-haiku".to_string());

        let researcher = config.model_config_for(AgentType::Researcher);
        assert_eq!(researcher.provider, LlmProvider::Anthropic);
        assert_eq!(researcher.model, "claude-haiku");
        assert!(researcher.base_url.is_none());

        let market = config.model_config_for(AgentType::MarketAnalyst);
        assert_eq!(market.provider, LlmProvider::OpenAI);
        assert_eq!(market.model, "gpt-4o");
        assert_eq!(market.base_url.as_deref(), Some("http://localhost:8080/v1"));
    }
}
