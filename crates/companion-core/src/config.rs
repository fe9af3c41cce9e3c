use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::ai::ollama::{DEFAULT_OLLAMA_HOST, DEFAULT_TIMEOUT};
use crate::model::{ModelChoice, DEFAULT_LANGUAGE};

pub const APP_DIR: &str = "code-companion";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub ollama_host: Option<String>,
    pub default_model: Option<String>,
    pub language: Option<String>,
    pub request_timeout_secs: Option<u64>,
    /// Replay failed-turn diagnostics to the model on later turns.
    pub replay_diagnostics: Option<bool>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: ModelChoice) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = Some(model.as_str().to_string());
        config.save()
    }

    /// `OLLAMA_HOST` wins over the config file.
    pub fn ollama_host(&self) -> String {
        self.resolve_host(std::env::var("OLLAMA_HOST").ok())
    }

    fn resolve_host(&self, env_host: Option<String>) -> String {
        env_host
            .filter(|h| !h.trim().is_empty())
            .or_else(|| self.ollama_host.clone())
            .map(|h| normalize_host(&h))
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string())
    }

    /// Unknown model names fall back to the default choice.
    pub fn model(&self) -> ModelChoice {
        self.default_model
            .as_deref()
            .and_then(ModelChoice::from_str)
            .unwrap_or_default()
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn replay_diagnostics(&self) -> bool {
        self.replay_diagnostics.unwrap_or(true)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join(APP_DIR).join("config.json"))
    }
}

/// Ollama accepts `OLLAMA_HOST=0.0.0.0:11434`; add the scheme it implies.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}
