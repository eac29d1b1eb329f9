use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::relationship::Relationship;

/// Runtime configuration, loaded from `config.json` in the data
/// directory or created from defaults on first run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Caller ids allowed to run privileged directives.
    #[serde(default)]
    pub admins: Vec<String>,
    /// One designated user is created pre-locked with a fixed relationship.
    #[serde(default)]
    pub pinned_user: Option<PinnedUser>,
    /// Bounded chat-history window per user.
    #[serde(default = "default_context_length")]
    pub context_length: usize,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnedUser {
    pub user_id: String,
    pub relationship: Relationship,
}

/// Settings for the completion endpoint (OpenAI-compatible chat API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_context_length() -> usize {
    10
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    800
}

impl Config {
    pub fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("aibot")
        });

        std::fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;

        let config_path = data_dir.join("config.json");

        if config_path.exists() {
            let config_str = std::fs::read_to_string(&config_path)
                .context("Failed to read config.json")?;

            match serde_json::from_str::<Config>(&config_str) {
                Ok(mut config) => {
                    config.data_dir = data_dir;
                    // Environment wins over an empty key in the file
                    if config
                        .provider
                        .api_key
                        .as_ref()
                        .map_or(true, |key| key.is_empty())
                    {
                        config.provider.api_key = std::env::var("AIBOT_API_KEY").ok();
                    }
                    return Ok(config);
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config.json, using defaults: {}", e);
                }
            }
        }

        let config = Self::default_config(data_dir);

        let json_str = serde_json::to_string_pretty(&config)
            .context("Failed to serialize default config")?;
        std::fs::write(&config_path, json_str)
            .context("Failed to write default config.json")?;

        Ok(config)
    }

    fn default_config(data_dir: PathBuf) -> Self {
        Config {
            data_dir,
            admins: Vec::new(),
            pinned_user: None,
            context_length: default_context_length(),
            provider: ProviderConfig {
                api_url: "https://api.deepseek.com/v1/chat/completions".to_string(),
                model: "deepseek-chat".to_string(),
                api_key: std::env::var("AIBOT_API_KEY").ok(),
                timeout_secs: default_timeout_secs(),
                retries: default_retries(),
                backoff_ms: default_backoff_ms(),
            },
        }
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn export_file(&self, user_id: &str) -> PathBuf {
        self.data_dir.join(format!("export_{}.txt", user_id))
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
