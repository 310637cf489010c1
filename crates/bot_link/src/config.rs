//! Configuration consumed by the link.
//!
//! The endpoint, token and debug flag come from a [`ConfigProvider`] that is
//! asked again before every connection attempt, so a host that reloads its
//! configuration file sees the new values on the next reconnect. Timing knobs
//! live in [`LinkOptions`] and are fixed for the lifetime of a manager.

use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::backoff::ReconnectPolicy;

/// Connection settings resolved per connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Websocket URL of the bot backend (e.g., "ws://127.0.0.1:26990/bridge")
    pub endpoint: String,
    /// Token presented in the AUTH frame
    pub token: String,
    /// Log every frame sent and received at info level
    #[serde(default)]
    pub debug: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:26990/bridge".to_string(),
            token: String::new(),
            debug: false,
        }
    }
}

/// Source of the current [`LinkConfig`].
pub trait ConfigProvider: Send + Sync {
    /// Returns the configuration to use for the next connection attempt.
    fn snapshot(&self) -> LinkConfig;
}

impl ConfigProvider for LinkConfig {
    fn snapshot(&self) -> LinkConfig {
        self.clone()
    }
}

/// Reloadable configuration: writers swap the value, the link picks it up
/// on its next attempt.
impl ConfigProvider for RwLock<LinkConfig> {
    fn snapshot(&self) -> LinkConfig {
        self.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

/// How this client describes itself in AUTH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub plugin_version: String,
    pub server_description: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            plugin_version: env!("CARGO_PKG_VERSION").to_string(),
            server_description: format!("bot_link_{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Timing knobs for a connection manager.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Reconnect backoff policy
    pub reconnect: ReconnectPolicy,
    /// How often the receive loop wakes up to re-check whether it should keep running
    pub recv_poll_interval: Duration,
    /// Default deadline for the typed API helpers
    pub call_timeout: Duration,
    /// How long before the backend's heartbeat expiry the keepalive is sent
    pub heartbeat_lead: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            recv_poll_interval: Duration::from_secs(1),
            call_timeout: Duration::from_secs(10),
            heartbeat_lead: Duration::from_secs(10),
        }
    }
}
