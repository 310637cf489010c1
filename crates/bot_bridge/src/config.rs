//! Configuration management for the bot bridge.
//!
//! This module handles loading and validation of the bridge configuration
//! from a TOML file, and converts it into the settings the link consumes.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Context;
use bot_link::{ClientIdentity, ConfigProvider, LinkConfig, LinkOptions, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

/// Bridge configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Connection to the bot backend
    #[serde(default)]
    pub link: LinkSettings,
    /// How this game server presents itself
    #[serde(default)]
    pub server: ServerSettings,
    /// Reconnect timing
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Websocket URL of the bot backend
    pub endpoint: String,
    /// Token presented during authentication
    #[serde(default)]
    pub token: String,
    /// Log every frame at info level
    #[serde(default)]
    pub debug: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        let defaults = LinkConfig::default();
        Self {
            endpoint: defaults.endpoint,
            token: defaults.token,
            debug: defaults.debug,
        }
    }
}

/// Server identity reported to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Name reported by GET_SERVER_INFO
    pub name: String,
    /// Description sent with authentication
    pub description: String,
    /// Game server software and version
    #[serde(default = "default_server_version")]
    pub version: String,
    #[serde(default)]
    pub online_mode: bool,
    #[serde(default = "default_true")]
    pub command_supported: bool,
    #[serde(default)]
    pub papi_supported: bool,
    #[serde(default)]
    pub has_geyser: bool,
}

fn default_server_version() -> String {
    "unknown".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "game_server".to_string(),
            description: format!("bot_bridge_{}", env!("CARGO_PKG_VERSION")),
            version: default_server_version(),
            online_mode: false,
            command_supported: true,
            papi_supported: false,
            has_geyser: false,
        }
    }
}

/// Backoff timings in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    pub base_ms: u64,
    pub max_ms: u64,
    pub error_pause_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            base_ms: policy.base.as_millis() as u64,
            max_ms: policy.max.as_millis() as u64,
            error_pause_ms: policy.error_pause.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter
    pub level: String,
    /// JSON formatting
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, writing a default file first if none
    /// exists.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let endpoint = Url::parse(&self.link.endpoint)
            .map_err(|e| format!("Invalid endpoint {}: {}", self.link.endpoint, e))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(format!(
                "Endpoint must use ws:// or wss://, got {}",
                endpoint.scheme()
            ));
        }

        if self.link.token.is_empty() {
            warn!("No token configured; the backend will likely reject authentication");
        }

        if self.server.name.is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        if self.reconnect.base_ms == 0 {
            return Err("reconnect.base_ms must be greater than zero".to_string());
        }
        if self.reconnect.max_ms < self.reconnect.base_ms {
            return Err("reconnect.max_ms must not be less than reconnect.base_ms".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            ));
        }

        Ok(())
    }

    /// Settings the link re-reads on every connection attempt.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            endpoint: self.link.endpoint.clone(),
            token: self.link.token.clone(),
            debug: self.link.debug,
        }
    }

    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            server_description: self.server.description.clone(),
            ..ClientIdentity::default()
        }
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            reconnect: ReconnectPolicy {
                base: Duration::from_millis(self.reconnect.base_ms),
                max: Duration::from_millis(self.reconnect.max_ms),
                error_pause: Duration::from_millis(self.reconnect.error_pause_ms),
            },
            ..LinkOptions::default()
        }
    }
}

/// The current configuration, swapped wholesale on reload.
///
/// The link reads its endpoint and token through [`ConfigProvider`]; the
/// built-in handlers read the server section.
#[derive(Debug, Default)]
pub struct SharedConfig {
    current: RwLock<AppConfig>,
}

impl SharedConfig {
    pub fn new(config: AppConfig) -> Self {
        Self {
            current: RwLock::new(config),
        }
    }

    pub fn get(&self) -> AppConfig {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, config: AppConfig) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
    }
}

impl ConfigProvider for SharedConfig {
    fn snapshot(&self) -> LinkConfig {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .link_config()
    }
}
