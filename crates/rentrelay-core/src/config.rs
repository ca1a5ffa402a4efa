//! RentRelay configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RentRelayError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentRelayConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_company_name")]
    pub company_name: String,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_db_path() -> String {
    "~/.rentrelay/rentrelay.db".into()
}
fn default_company_name() -> String {
    "RentRelay".into()
}

impl Default for RentRelayConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            company_name: default_company_name(),
            sms: SmsConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl RentRelayConfig {
    /// Load config from the default path (~/.rentrelay/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RentRelayError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RentRelayError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RentRelayError::Config(format!("Failed to create config dir: {e}")))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RentRelayError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)
            .map_err(|e| RentRelayError::Config(format!("Failed to write config: {e}")))?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the RentRelay home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rentrelay")
    }
}

/// SMS gateway configuration (TextBelt-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Use the provider's test key — nothing is actually delivered.
    #[serde(default)]
    pub test_mode: bool,
    /// Inter-message delay for outbound rate limiting, in milliseconds.
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
}

fn default_api_base() -> String {
    "https://textbelt.com/text".into()
}
fn default_send_delay_ms() -> u64 {
    1000
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            test_mode: false,
            send_delay_ms: default_send_delay_ms(),
        }
    }
}

/// Scheduler behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// A fire delayed past this window is skipped instead of executed.
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
    /// Reject rule trees with unknown fields/operators at creation
    /// time instead of evaluating them fail-open.
    #[serde(default)]
    pub strict_rules: bool,
}

fn default_misfire_grace_secs() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            misfire_grace_secs: default_misfire_grace_secs(),
            strict_rules: false,
        }
    }
}
