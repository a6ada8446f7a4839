//! Runtime configuration.
//!
//! Configuration is a TOML file read once at startup. Every section has
//! defaults, so an absent file or an empty one is a valid configuration.
//!
//! ```toml
//! [content]
//! reuse_content = true
//!
//! [store]
//! backend = "redis"
//! url = "redis://127.0.0.1:6379"
//!
//! [model]
//! backend = "openai"
//! endpoint = "http://localhost:1234/v1/chat/completions"
//! model = "local-model"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::HttpModelConfig;

/// The complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub content: ContentPolicy,
    pub store: StoreConfig,
    pub model: ModelConfig,
}

/// How pages are generated and post-processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPolicy {
    /// System prompt sent with every generation.
    pub system_prompt: String,

    /// Give the model the nearest earlier page as a starting point.
    pub reuse_content: bool,

    /// Strip reasoning blocks and code fences from model output.
    pub sanitize: bool,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            system_prompt: crate::system_prompt().to_string(),
            reuse_content: false,
            sanitize: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreKind,
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreKind::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// OpenAI-compatible chat completions endpoint.
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: ModelKind,
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let http = HttpModelConfig::default();
        Self {
            backend: ModelKind::Openai,
            endpoint: http.endpoint,
            model: http.model,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: http.temperature,
            timeout_secs: http.timeout_secs,
        }
    }
}

impl ModelConfig {
    /// Settings for the HTTP backend, reading the API key from the environment.
    pub fn http_config(&self) -> HttpModelConfig {
        let api_key = std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        HttpModelConfig {
            endpoint: self.endpoint.clone(),
            api_key,
            model: self.model.clone(),
            temperature: self.temperature,
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}'")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StoreKind::Redis && self.store.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.url must not be empty".to_string(),
            ));
        }

        if self.model.model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "model.model must not be empty".to_string(),
            ));
        }

        if self.model.backend == ModelKind::Openai && self.model.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "model.endpoint must not be empty".to_string(),
            ));
        }

        if self.model.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "model.timeout_secs must be > 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::Invalid(format!(
                "model.temperature must be within 0.0..=2.0, got {}",
                self.model.temperature
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = Config::from_toml("").unwrap();
        assert!(!config.content.reuse_content);
        assert!(config.content.sanitize);
        assert_eq!(config.content.system_prompt, crate::system_prompt());
        assert_eq!(config.store.backend, StoreKind::Redis);
        assert_eq!(config.model.backend, ModelKind::Openai);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [content]
            reuse_content = true

            [store]
            backend = "memory"

            [model]
            backend = "openai"
            temperature = 0.2
            "#,
        )
        .unwrap();
        assert!(config.content.reuse_content);
        assert!(config.content.sanitize);
        assert_eq!(config.store.backend, StoreKind::Memory);
        assert_eq!(config.model.backend, ModelKind::Openai);
        assert_eq!(config.model.temperature, 0.2);
        assert_eq!(config.model.model, "gpt-4o-mini");

        assert!(Config::from_toml("[model]\nbackend = \"acp\"\n").is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.model.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.model.temperature = 3.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.store.url = " ".to_string();
        assert!(config.validate().is_err());
        config.store.backend = StoreKind::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pagewright.toml");
        std::fs::write(&path, "[model]\ntemperature = \"hot\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("pagewright.toml"));
    }
}
