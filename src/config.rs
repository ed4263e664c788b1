use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Completion proxy settings
    pub api: ApiConfig,

    /// How assistant replies are delivered
    pub delivery: DeliveryConfig,

    /// Quick replies and periodic feedback
    pub assist: AssistConfig,

    /// Where conversations are persisted
    pub storage: StorageConfig,

    /// Rehearse home directory
    #[serde(skip)]
    pub rehearse_home: PathBuf,
}

/// Remote completion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the edge functions that proxy the LLM
    pub base_url: Option<String>,
    /// Key sent as bearer token to the proxy
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

/// Target platform; decides whether streaming is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Native,
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub platform: Platform,
    /// Allow streaming on platforms that support it
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistConfig {
    pub quick_replies: bool,
    /// Number of recent messages sent along with auxiliary requests
    pub context_window: usize,
    pub feedback: bool,
    pub feedback_every_n_messages: usize,
    pub feedback_min_interval_secs: u64,
}

/// Persistence backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// JSON files under the data directory
    Local,
    /// Supabase-style REST tables
    Rest,
    /// Keep everything in memory
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Access token of the signed-in user for row-level security
    pub access_token: Option<String>,
    /// Signed-in user; absent means guest sessions
    pub user_id: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));

        Config {
            api: ApiConfig {
                base_url: None,
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                max_tokens: 1000,
                temperature: 0.7,
                timeout_secs: 60,
            },
            delivery: DeliveryConfig {
                platform: Platform::Native,
                streaming: true,
            },
            assist: AssistConfig {
                quick_replies: true,
                context_window: 6,
                feedback: true,
                feedback_every_n_messages: 3,
                feedback_min_interval_secs: 30,
            },
            storage: StorageConfig {
                backend: BackendKind::Local,
                url: None,
                api_key: None,
                access_token: None,
                user_id: None,
                data_dir: None,
            },
            rehearse_home: home.join(".rehearse"),
        }
    }
}

impl Config {
    /// Load configuration from `~/.rehearse/config.toml`, then apply env overrides
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        let mut config = Self::load_from(&home.join(".rehearse"))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration rooted at an explicit home directory
    pub fn load_from(rehearse_home: &Path) -> Result<Self> {
        let config_path = rehearse_home.join("config.toml");

        fs::create_dir_all(rehearse_home)
            .context("Failed to create .rehearse directory")?;

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            toml::from_str(&content)
                .context("Failed to parse config file")?
        } else {
            Config::default()
        };

        config.rehearse_home = rehearse_home.to_path_buf();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.rehearse_home)
            .context("Failed to create .rehearse directory")?;
        let config_path = self.config_path();
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    pub fn config_path(&self) -> PathBuf {
        self.rehearse_home.join("config.toml")
    }

    /// Apply `REHEARSE_*` overrides from the given lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REHEARSE_API_URL") {
            self.api.base_url = Some(url);
        }
        if let Some(key) = lookup("REHEARSE_API_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(model) = lookup("REHEARSE_MODEL") {
            self.api.model = model;
        }
        if let Some(url) = lookup("REHEARSE_BACKEND_URL") {
            self.storage.url = Some(url);
        }
        if let Some(key) = lookup("REHEARSE_BACKEND_KEY") {
            self.storage.api_key = Some(key);
        }
        if let Some(user_id) = lookup("REHEARSE_USER_ID") {
            self.storage.user_id = Some(user_id);
        }
    }

    /// Check if the completion proxy is usable
    pub fn has_api(&self) -> bool {
        self.api.base_url.as_deref().is_some_and(|u| !u.trim().is_empty())
            && self.api.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Directory used by the local JSON backend
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| self.rehearse_home.join("conversations"))
    }
}
