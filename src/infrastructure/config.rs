//! Configuration infrastructure
//!
//! Loading and management of the engine's settings: portal access, bulk
//! fetch limits, history retention, logging. Stored as pretty-printed JSON
//! under the platform config directory; a file that fails to parse is
//! backed up and replaced with defaults rather than aborting startup.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::domain::history::HISTORY_RETENTION;
use crate::infrastructure::portal;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub portal: PortalConfig,
    pub bulk: BulkConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

/// Portal access settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Portal base URL
    pub base_url: String,

    /// Live-page poll interval in seconds
    pub poll_interval_seconds: u64,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// User agent string
    pub user_agent: String,
}

impl PortalConfig {
    pub fn live_calls_url(&self) -> String {
        format!("{}/Calls", self.base_url.trim_end_matches('/'))
    }

    pub fn history_url_base(&self) -> String {
        format!("{}/Calls/History", self.base_url.trim_end_matches('/'))
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: portal::BASE_URL.to_string(),
            poll_interval_seconds: 10,
            request_timeout_seconds: 30,
            user_agent: "callwatch/0.3 (operator desk agent)".to_string(),
        }
    }
}

/// Bulk history fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Hard cap on history pages walked in one crawl
    pub max_pages: u32,

    /// Pages fetched concurrently per batch
    pub batch_size: u32,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_pages: 20,
            batch_size: 5,
        }
    }
}

/// History retention and draft persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Entries kept in the bounded history log
    pub retention: usize,

    /// Quiet period before a pending draft write is flushed
    pub draft_debounce_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention: HISTORY_RETENTION,
            draft_debounce_ms: 800,
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Module-specific log level filters (e.g., "reqwest": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_filters = HashMap::new();
        module_filters.insert("reqwest".to_string(), "warn".to_string());
        module_filters.insert("hyper".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
            module_filters,
        }
    }
}

/// Manages the configuration file lifecycle.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = Self::config_dir()?;
        Ok(Self {
            config_path: config_dir.join("config.json"),
        })
    }

    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Platform config directory for the application.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("callwatch");
        Ok(dir)
    }

    /// Load configuration from file, creating the default if it doesn't
    /// exist yet.
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("Loaded configuration from: {:?}", self.config_path);
                Ok(config)
            }
            Err(parse_error) => {
                warn!("Configuration file unreadable ({}), resetting to defaults", parse_error);

                // Keep the unreadable file around for inspection
                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    warn!("Failed to back up corrupted config: {}", e);
                } else {
                    info!("Backed up corrupted config to: {:?}", backup_path);
                }

                let default_config = AppConfig::default();
                self.save_config(&default_config)
                    .await
                    .context("Failed to save default configuration")?;
                Ok(default_config)
            }
        }
    }

    /// Save configuration to file.
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        let content = serde_json::to_string_pretty(config)
            .context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        Ok(())
    }
}
