//! Negotiation and oracle configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NegotiationError, Result};

pub const DEFAULT_MAX_ROUNDS: u32 = 7;
pub const DEFAULT_ORACLE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-preview-09-2025";

/// Driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Evaluation rounds before giving up
    pub max_rounds: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

/// Chat-completions backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    /// Pin requests to one upstream provider
    pub provider: Option<String>,
    pub timeout_secs: u64,
    pub referer: String,
    pub title: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("PARLEY_ORACLE_URL")
                .unwrap_or_else(|_| DEFAULT_ORACLE_URL.to_string()),
            api_key: std::env::var("OPENROUTER_API_KEY").ok(),
            model: std::env::var("PARLEY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            provider: std::env::var("PARLEY_PROVIDER").ok(),
            timeout_secs: 120,
            referer: "https://github.com/parley-rs/parley".to_string(),
            title: "Parley Negotiation".to_string(),
        }
    }
}

/// Everything the binary needs, loadable from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub negotiation: NegotiationConfig,
    pub oracle: OracleConfig,
}

impl Settings {
    /// Load from an optional TOML file, with `.env` applied first.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();

        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    NegotiationError::Config(format!("reading {}: {e}", path.display()))
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };

        // Secrets never live in the file.
        if settings.oracle.api_key.is_none() {
            settings.oracle.api_key = std::env::var("OPENROUTER_API_KEY").ok();
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| NegotiationError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.negotiation.max_rounds == 0 {
            return Err(NegotiationError::Config("max_rounds must be at least 1".into()));
        }
        if self.oracle.model.trim().is_empty() {
            return Err(NegotiationError::Config("oracle model must be set".into()));
        }
        Ok(())
    }
}
