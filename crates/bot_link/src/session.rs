//! Per-connection session attributes negotiated during the handshake.

use serde::{Deserialize, Serialize};

use crate::codec::Payload;
use crate::error::LinkError;

/// What the backend told us about itself in HELLO, plus the display name it
/// assigned us in AUTH_ACK.
///
/// One of these exists per connection attempt. A reconnect builds a new one
/// from the next HELLO instead of mutating the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Backend core version
    pub version: String,
    /// Backend host OS descriptor
    pub system: String,
    /// Backend runtime descriptor
    #[serde(alias = "dotnet")]
    pub runtime: String,
    /// Session identifier assigned by the backend
    pub session_id: String,
    /// Token echoed by the backend in HELLO. Stored only; authentication
    /// always uses the locally configured token.
    #[serde(default)]
    pub token: Option<String>,
    /// Heartbeat expiry interval in seconds
    pub interval: u64,
    /// Display name, set once AUTH_ACK arrives
    #[serde(default, skip_deserializing)]
    pub server_name: Option<String>,
}

impl SessionState {
    /// Builds a session from the fields of a HELLO frame.
    pub fn from_hello(payload: &Payload) -> Result<Self, LinkError> {
        serde_json::from_value(serde_json::Value::Object(payload.clone()))
            .map_err(|e| LinkError::Protocol(format!("malformed hello: {e}")))
    }

    /// Returns a copy carrying the name assigned in AUTH_ACK.
    pub fn with_server_name(&self, server_name: impl Into<String>) -> Self {
        Self {
            server_name: Some(server_name.into()),
            ..self.clone()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.server_name.is_some()
    }
}
