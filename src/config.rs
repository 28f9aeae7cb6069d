use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for GitPoor
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// SQLite database holding commits, streaks and token records
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// GitHub API and OAuth settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Sync run behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// HTTP trigger settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// REST API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// OAuth token endpoint used for refresh-token exchange
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// OAuth app client id
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth app client secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Size of the single activity page read per run
    #[serde(default = "default_events_per_page")]
    pub events_per_page: u8,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Maximum concurrent commit detail lookups
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Refresh the stored token when it expires within this many seconds
    #[serde(default = "default_refresh_window_secs")]
    pub refresh_window_secs: u64,

    /// Minimum minutes between automatic syncs for one user
    #[serde(default = "default_auto_sync_threshold")]
    pub auto_sync_threshold_minutes: i64,

    /// Minimum minutes between automatic syncs triggered from a group view
    #[serde(default = "default_group_auto_sync_threshold")]
    pub group_auto_sync_threshold_minutes: i64,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact" or "json"
}

// Default value functions
fn default_database_path() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/gitpoor/gitpoor.db", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/gitpoor/gitpoor.db", home)
    } else {
        "/tmp/gitpoor.db".to_string()
    }
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}
fn default_events_per_page() -> u8 {
    100
}
fn default_max_concurrent_fetches() -> usize {
    8
}
fn default_refresh_window_secs() -> u64 {
    300
}
fn default_auto_sync_threshold() -> i64 {
    60
}
fn default_group_auto_sync_threshold() -> i64 {
    180
}
fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_url: default_token_url(),
            client_id: None,
            client_secret: None,
            events_per_page: default_events_per_page(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            refresh_window_secs: default_refresh_window_secs(),
            auto_sync_threshold_minutes: default_auto_sync_threshold(),
            group_auto_sync_threshold_minutes: default_group_auto_sync_threshold(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            config.apply_env_overrides();
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.apply_env_overrides();
        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("gitpoor").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.database_path = shellexpand::full(&self.database_path)
            .context("Failed to expand database_path")?
            .into_owned();

        Ok(())
    }

    /// OAuth client credentials may come from the environment instead of the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("GITPOOR_GITHUB_CLIENT_ID") {
            if !id.is_empty() {
                self.github.client_id = Some(id);
            }
        }
        if let Ok(secret) = std::env::var("GITPOOR_GITHUB_CLIENT_SECRET") {
            if !secret.is_empty() {
                self.github.client_secret = Some(secret);
            }
        }
    }

    pub fn refresh_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.sync.refresh_window_secs as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            github: GitHubConfig::default(),
            sync: SyncConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
