//! Exec handlers the bridge answers on its own.

use std::sync::Arc;

use bot_link::{ExecContext, HandlerError, HandlerRegistry, Payload, SessionState};
use serde_json::{json, Value};
use tracing::info;

use crate::config::SharedConfig;

/// Message segment kinds used by SEND_TO_CHAT.
const SEGMENT_TEXT: u64 = 2;
const SEGMENT_IMAGE: u64 = 3;
const SEGMENT_AT: u64 = 4;
const SEGMENT_FILE: u64 = 5;
const SEGMENT_REPLY: u64 = 6;

/// Registers the built-in handlers.
pub fn register(registry: &HandlerRegistry, config: Arc<SharedConfig>) {
    let info_config = config.clone();
    registry.on_async("GET_SERVER_INFO", move |ctx, _payload, _session| {
        let config = info_config.clone();
        async move {
            ctx.respond(server_info(&config)).await?;
            Ok::<(), HandlerError>(())
        }
    });
    registry.on("SEND_TO_CHAT", send_to_chat);

    let local = config.clone();
    registry.on("CROSS_SERVER_SAY", move |_ctx, payload, _session| {
        if let Some(line) = cross_server_line(payload, &local.get().server.name)? {
            info!("🌐 {}", line);
        }
        Ok(())
    });
    registry.on("BIND_SUCCESS_NOTIFY", bind_success_notify);
    registry.on("UN_BIND_NOTIFY", un_bind_notify);
}

fn required_str<'a>(payload: &'a Payload, field: &str) -> Result<&'a str, HandlerError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::MissingField(field.to_string()))
}

fn server_info(config: &SharedConfig) -> Payload {
    let server = config.get().server;
    let info = json!({
        "server_name": server.name,
        "server_version": server.version,
        "plugin_version": env!("CARGO_PKG_VERSION"),
        "is_papi_supported": server.papi_supported,
        "is_command_supported": server.command_supported,
        "has_geyser": server.has_geyser,
        "is_online_mode": server.online_mode,
    });
    match info {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

fn send_to_chat(
    _ctx: &ExecContext,
    payload: &Payload,
    _session: Option<&SessionState>,
) -> Result<(), HandlerError> {
    let line = render_chat(payload)?;
    info!("💬 [chat] {}", line);
    Ok(())
}

/// Formats chat relayed from another server as `server<player>message`.
///
/// Returns `None` for chat that originated on this server.
pub fn cross_server_line(
    payload: &Payload,
    local_server: &str,
) -> Result<Option<String>, HandlerError> {
    let server_name = required_str(payload, "server_name")?;
    let player = required_str(payload, "player")?;
    let message = required_str(payload, "message")?;
    if server_name == local_server {
        return Ok(None);
    }
    Ok(Some(format!("{}<{}>{}", server_name, player, message)))
}

fn bind_success_notify(
    _ctx: &ExecContext,
    payload: &Payload,
    _session: Option<&SessionState>,
) -> Result<(), HandlerError> {
    let player_name = required_str(payload, "player_name")?;
    let account_id = required_str(payload, "account_id")?;
    let account_name = required_str(payload, "account_name")?;
    info!(
        "🔗 Player {} bound to account {} ({})",
        player_name, account_name, account_id
    );
    Ok(())
}

fn un_bind_notify(
    _ctx: &ExecContext,
    payload: &Payload,
    _session: Option<&SessionState>,
) -> Result<(), HandlerError> {
    let player_name = required_str(payload, "player_name")?;
    let kick_message = required_str(payload, "kick_message")?;
    info!("✂️ Player {} unbound: {}", player_name, kick_message);
    Ok(())
}

/// Flattens a SEND_TO_CHAT payload into one printable line.
///
/// Without `extra` the plain `text` is used. Otherwise the segments are
/// concatenated, with non-text segments shown as short placeholders.
pub fn render_chat(payload: &Payload) -> Result<String, HandlerError> {
    let Some(segments) = payload.get("extra").and_then(Value::as_array) else {
        return payload
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HandlerError::MissingField("text".to_string()));
    };

    let mut line = String::new();
    for segment in segments {
        let text_of = |field: &str| segment.get(field).and_then(Value::as_str).unwrap_or("");
        match segment.get("type").and_then(Value::as_u64) {
            Some(SEGMENT_TEXT) => line.push_str(text_of("text")),
            Some(SEGMENT_IMAGE) => line.push_str("[image]"),
            Some(SEGMENT_AT) => line.push_str(&render_mention(segment)),
            Some(SEGMENT_FILE) => line.push_str("[file]"),
            Some(SEGMENT_REPLY) => line.push_str("[reply]"),
            _ => {}
        }
    }
    Ok(line)
}

fn render_mention(segment: &Value) -> String {
    let players: Vec<&str> = segment
        .get("at_player_names")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let user_id = segment.get("at_user_id").and_then(Value::as_str).unwrap_or("");

    if user_id == "0" {
        "@all".to_string()
    } else if players.is_empty() {
        let user_name = segment.get("at_user_name").and_then(Value::as_str).unwrap_or("");
        format!("@{}", user_name)
    } else {
        format!("@{}", players.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use bot_link::{FrameSink, Frame, LinkError};
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<Frame>);

    #[async_trait::async_trait]
    impl FrameSink for ChannelSink {
        async fn send_frame(&self, frame: Frame) -> Result<(), LinkError> {
            self.0.send(frame).map_err(|_| LinkError::NotConnected)
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_server_info_reflects_current_config() {
        let mut config = AppConfig::default();
        config.server.name = "survival".to_string();
        config.server.online_mode = true;
        let shared = Arc::new(SharedConfig::new(config));

        let registry = HandlerRegistry::new();
        register(&registry, shared.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ExecContext::new("cb-7", "GET_SERVER_INFO", Arc::new(ChannelSink(tx)));
        assert_eq!(registry.dispatch(ctx, Payload::new(), None).await, 1);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.payload["callback_id"], json!("cb-7"));
        assert_eq!(frame.payload["server_name"], json!("survival"));
        assert_eq!(frame.payload["is_online_mode"], json!(true));
        assert_eq!(frame.payload["is_command_supported"], json!(true));
        assert_eq!(frame.payload["plugin_version"], json!(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_plain_text_chat() {
        let line = render_chat(&payload(json!({"text": "<Alex> hi"}))).unwrap();
        assert_eq!(line, "<Alex> hi");
    }

    #[test]
    fn test_segmented_chat() {
        let line = render_chat(&payload(json!({
            "text": "ignored",
            "extra": [
                {"type": 2, "text": "look "},
                {"type": 3, "url": "https://example.invalid/cat.png"},
                {"type": 2, "text": " "},
                {"type": 4, "at_user_id": "42", "at_user_name": "alex_qq", "at_player_names": ["Alex", "Sam"]},
                {"type": 2, "text": " "},
                {"type": 4, "at_user_id": "0", "at_user_name": "everyone", "at_player_names": []},
                {"type": 2, "text": " "},
                {"type": 4, "at_user_id": "7", "at_user_name": "lurker", "at_player_names": []},
                {"type": 5},
                {"type": 6},
                {"type": 99}
            ]
        })))
        .unwrap();
        assert_eq!(line, "look [image] @Alex,Sam @all @lurker[file][reply]");
    }

    #[test]
    fn test_cross_server_chat_from_elsewhere() {
        let line = cross_server_line(
            &payload(json!({"server_name": "creative", "player": "Alex", "message": "hi all"})),
            "survival",
        )
        .unwrap();
        assert_eq!(line.as_deref(), Some("creative<Alex>hi all"));
    }

    #[test]
    fn test_cross_server_chat_echo_is_skipped() {
        let line = cross_server_line(
            &payload(json!({"server_name": "survival", "player": "Alex", "message": "hi"})),
            "survival",
        )
        .unwrap();
        assert!(line.is_none());

        let partial = payload(json!({"server_name": "creative", "player": "Alex"}));
        let err = cross_server_line(&partial, "survival").unwrap_err();
        assert!(matches!(err, HandlerError::MissingField(field) if field == "message"));
    }

    #[tokio::test]
    async fn test_notify_handlers_are_registered_and_log_only() {
        let registry = HandlerRegistry::new();
        register(&registry, Arc::new(SharedConfig::new(AppConfig::default())));
        assert_eq!(registry.count_for("CROSS_SERVER_SAY"), 1);
        assert_eq!(registry.count_for("BIND_SUCCESS_NOTIFY"), 1);
        assert_eq!(registry.count_for("UN_BIND_NOTIFY"), 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn FrameSink> = Arc::new(ChannelSink(tx));
        let bound = payload(json!({
            "player_name": "Steve",
            "account_id": "10001",
            "account_name": "steve_qq"
        }));
        let ctx = ExecContext::new("0", "BIND_SUCCESS_NOTIFY", sink.clone());
        assert_eq!(registry.dispatch(ctx, bound, None).await, 1);

        let unbound = payload(json!({"player_name": "Steve", "kick_message": "unbound"}));
        let ctx = ExecContext::new("0", "UN_BIND_NOTIFY", sink);
        assert_eq!(registry.dispatch(ctx, unbound, None).await, 1);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_without_player_is_an_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = ExecContext::new("0", "UN_BIND_NOTIFY", Arc::new(ChannelSink(tx)));
        let no_player = payload(json!({"kick_message": "bye"}));
        let err = un_bind_notify(&ctx, &no_player, None).unwrap_err();
        assert!(matches!(err, HandlerError::MissingField(field) if field == "player_name"));

        let no_account = payload(json!({"player_name": "Steve"}));
        let err = bind_success_notify(&ctx, &no_account, None).unwrap_err();
        assert!(matches!(err, HandlerError::MissingField(field) if field == "account_id"));
    }

    #[test]
    fn test_chat_without_text_is_an_error() {
        let err = render_chat(&Payload::new()).unwrap_err();
        assert!(matches!(err, HandlerError::MissingField(field) if field == "text"));
    }
}
