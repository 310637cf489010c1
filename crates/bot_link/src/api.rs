//! Typed calls for the operations the bot backend understands.
//!
//! These are thin wrappers over [`ConnectionManager::call`] and
//! [`ConnectionManager::send`]. The game server side supplies player details
//! as a [`PlayerInfo`]; keeping track of who is online is the caller's job.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::Payload;
use crate::connection::ConnectionManager;
use crate::error::LinkError;

/// Deadline for `PLAYER_JOIN`; the server is holding a login while it waits.
pub const PLAYER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A player as the backend expects to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_name: String,
    pub player_uuid: String,
    pub ip: String,
    #[serde(default)]
    pub skin_url: String,
    #[serde(default)]
    pub bedrock: bool,
}

impl PlayerInfo {
    pub fn new(
        player_name: impl Into<String>,
        player_uuid: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            player_name: player_name.into(),
            player_uuid: player_uuid.into(),
            ip: ip.into(),
            skin_url: String::new(),
            bedrock: false,
        }
    }
}

/// The backend's verdict on a joining player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlayerJoinResult {
    #[serde(default)]
    pub kick: bool,
    #[serde(default)]
    pub kick_message: Option<String>,
}

/// Social account bound to a player, if any.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SocialAccount {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    /// Anything else the backend sent
    #[serde(flatten)]
    pub extra: Payload,
}

impl SocialAccount {
    pub fn is_bound(&self) -> bool {
        self.uuid.as_deref().is_some_and(|uuid| !uuid.is_empty())
    }
}

/// A bind code issued by `START_BIND`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BindCode {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(flatten)]
    pub extra: Payload,
}

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Player descriptor for the sync operations, which also carry the raw name.
fn sync_player(player: &PlayerInfo) -> Result<Value, LinkError> {
    let mut value = serde_json::to_value(player)?;
    if let Value::Object(map) = &mut value {
        map.insert(
            "player_name_raw".to_string(),
            Value::from(player.player_name.as_str()),
        );
    }
    Ok(value)
}

fn parse<T: for<'de> Deserialize<'de>>(response: Payload) -> Result<T, LinkError> {
    Ok(serde_json::from_value(Value::Object(response))?)
}

fn join_payload(player: &PlayerInfo) -> Result<Payload, LinkError> {
    let mut payload = Payload::new();
    payload.insert("player".to_string(), serde_json::to_value(player)?);
    Ok(payload)
}

fn report_payload(player: &PlayerInfo) -> Payload {
    object(serde_json::json!({
        "player_name": player.player_name,
        "player_uuid": player.player_uuid,
        "player_ip": player.ip,
    }))
}

fn message_payload(player: &PlayerInfo, message: &str, use_command: bool) -> Result<Payload, LinkError> {
    let mut payload = Payload::new();
    payload.insert("player".to_string(), sync_player(player)?);
    payload.insert("message".to_string(), Value::from(message));
    payload.insert("use_command".to_string(), Value::from(use_command));
    Ok(payload)
}

fn death_payload(player: &PlayerInfo, killer: &str, raw: &str) -> Result<Payload, LinkError> {
    let mut payload = Payload::new();
    payload.insert("player".to_string(), sync_player(player)?);
    payload.insert("raw".to_string(), Value::from(raw));
    payload.insert("killer".to_string(), Value::from(killer));
    Ok(payload)
}

fn enter_exit_payload(player: &PlayerInfo, is_enter: bool) -> Result<Payload, LinkError> {
    let mut payload = Payload::new();
    payload.insert("player".to_string(), sync_player(player)?);
    payload.insert("is_enter".to_string(), Value::from(is_enter));
    Ok(payload)
}

fn player_name_payload(player_name: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("player_name".to_string(), Value::from(player_name));
    payload
}

impl ConnectionManager {
    /// Asks the backend whether `player` may join.
    pub async fn player_join(&self, player: &PlayerInfo) -> Result<PlayerJoinResult, LinkError> {
        let response = self
            .call("PLAYER_JOIN", join_payload(player)?, PLAYER_JOIN_TIMEOUT)
            .await?;
        parse(response)
    }

    pub async fn report_player(&self, player: &PlayerInfo) -> Result<(), LinkError> {
        self.send("REPORT_PLAYER", report_payload(player)).await
    }

    /// Forwards a chat line. `use_command` marks messages typed as a command.
    pub async fn push_message(
        &self,
        player: &PlayerInfo,
        message: &str,
        use_command: bool,
    ) -> Result<(), LinkError> {
        self.send("SYNC_MESSAGE", message_payload(player, message, use_command)?)
            .await
    }

    pub async fn push_death(&self, player: &PlayerInfo, killer: &str, raw: &str) -> Result<(), LinkError> {
        self.send("SYNC_DEATH_MESSAGE", death_payload(player, killer, raw)?)
            .await
    }

    pub async fn push_enter(&self, player: &PlayerInfo) -> Result<(), LinkError> {
        self.send("SYNC_ENTER_EXIT_MESSAGE", enter_exit_payload(player, true)?)
            .await
    }

    pub async fn push_exit(&self, player: &PlayerInfo) -> Result<(), LinkError> {
        self.send("SYNC_ENTER_EXIT_MESSAGE", enter_exit_payload(player, false)?)
            .await
    }

    pub async fn get_social_account(&self, player_name: &str) -> Result<SocialAccount, LinkError> {
        let response = self
            .call(
                "GET_SOCIAL_ACCOUNT",
                player_name_payload(player_name),
                self.options().call_timeout,
            )
            .await?;
        parse(response)
    }

    /// Requests a bind code the player can send to the bot.
    pub async fn start_bind(&self, player_name: &str) -> Result<BindCode, LinkError> {
        let response = self
            .call("START_BIND", player_name_payload(player_name), self.options().call_timeout)
            .await?;
        parse(response)
    }
}
