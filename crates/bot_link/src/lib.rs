//! # Bot Link
//!
//! A persistent websocket client that connects a game server to a chat bot
//! backend. The link keeps itself alive: it reconnects with exponential
//! backoff, authenticates with a token, sends keepalives, and routes
//! commands from the backend to registered handlers.
//!
//! ## Protocol
//!
//! Every frame is a JSON object with an integer `op` field:
//!
//! | op | name      | direction          |
//! |----|-----------|--------------------|
//! | 0  | HELLO     | backend -> client  |
//! | 1  | AUTH      | client -> backend  |
//! | 2  | HEARTBEAT | client -> backend  |
//! | 3  | AUTH_ACK  | backend -> client  |
//! | 4  | EXEC      | both               |
//! | 5  | RESPONSE  | both               |
//!
//! EXEC frames name an operation in `exec_op` and carry a `callback_id`; the
//! RESPONSE frame answering one echoes the same `callback_id`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bot_link::{ConnectionManager, HandlerError, HandlerRegistry, LinkConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(HandlerRegistry::new());
//!     registry.on_async("GET_SERVER_INFO", |ctx, _payload, _session| async move {
//!         let mut info = bot_link::Payload::new();
//!         info.insert("server_name".into(), "lobby".into());
//!         ctx.respond(info).await?;
//!         Ok::<(), HandlerError>(())
//!     });
//!
//!     let config = LinkConfig {
//!         endpoint: "ws://127.0.0.1:26990/bridge".to_string(),
//!         token: "secret".to_string(),
//!         debug: false,
//!     };
//!     let link = ConnectionManager::new(Arc::new(config), registry);
//!     link.start().await;
//!
//!     // ... run the game server ...
//!
//!     link.stop().await;
//! }
//! ```

pub mod api;
pub mod codec;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod session;

pub use api::{BindCode, PlayerInfo, PlayerJoinResult, SocialAccount};
pub use codec::{Frame, OpCode, Payload};
pub use config::{ClientIdentity, ConfigProvider, LinkConfig, LinkOptions};
pub use connection::{ConnectionManager, FrameSink, LinkState, ReconnectPolicy};
pub use dispatcher::{ExecContext, ExecHandler, HandlerRegistry};
pub use error::{HandlerError, LinkError};
pub use session::SessionState;
