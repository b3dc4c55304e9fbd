use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::gemini_client::{DEFAULT_MODEL, GEMINI_ENDPOINT};

/// Environment variable holding the Gemini API key
pub const API_KEY_VAR: &str = "GOOGLE_API_KEY";

/// Fatal startup conditions
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API key missing: set {0} in the environment or in a .env file")]
    MissingApiKey(&'static str),

    #[error("API key in {0} is empty")]
    EmptyApiKey(&'static str),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,
    pub model: String,
    pub api_endpoint: String,

    // Unset means the HTTP client's own default
    pub request_timeout_secs: Option<u64>,

    // Batch input resolution when no path is given
    pub default_xlsx: PathBuf,
    pub default_csv: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            model: DEFAULT_MODEL.to_string(),
            api_endpoint: GEMINI_ENDPOINT.to_string(),
            request_timeout_secs: None,
            default_xlsx: PathBuf::from("casos_pacientes.xlsx"),
            default_csv: PathBuf::from("casos_pacientes.csv"),
        }
    }
}

impl Config {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file {:?}", path))?;
            config.validate()?;
            Ok(config)
        } else {
            debug!("No config file at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".prioria"))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.json"))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model name cannot be empty".to_string()));
        }
        if !self.api_endpoint.starts_with("http://") && !self.api_endpoint.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "api_endpoint must use http or https, got: {}",
                self.api_endpoint
            )));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read the API key from the process environment, after loading `.env` if present
pub fn api_key_from_env() -> Result<String, ConfigError> {
    if let Ok(path) = dotenvy::dotenv() {
        debug!("Loaded environment from {:?}", path);
    }
    resolve_api_key(std::env::var(API_KEY_VAR).ok())
}

/// Validate a raw API key lookup result
pub fn resolve_api_key(raw: Option<String>) -> Result<String, ConfigError> {
    match raw {
        None => Err(ConfigError::MissingApiKey(API_KEY_VAR)),
        Some(key) if key.trim().is_empty() => Err(ConfigError::EmptyApiKey(API_KEY_VAR)),
        Some(key) => Ok(key.trim().to_string()),
    }
}
