//! Connection lifecycle management.
//!
//! This module owns the single socket to the bot backend: opening it with
//! backoff, driving the HELLO / AUTH / AUTH_ACK handshake, routing inbound
//! frames, and tearing everything down again when the socket goes away.

pub mod backoff;
pub mod manager;
pub mod outbound;

pub use backoff::{ReconnectPolicy, ReconnectState};
pub use manager::ConnectionManager;
pub use outbound::FrameSink;

use std::fmt;

/// Where the connection manager is in its lifecycle.
///
/// `Idle -> Connecting -> Handshaking -> Authenticated`, falling back to
/// `Connecting` on every disconnect. `Closing` is only entered through
/// [`ConnectionManager::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Idle,
    Connecting,
    Handshaking,
    Authenticated,
    Closing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Idle => "idle",
            LinkState::Connecting => "connecting",
            LinkState::Handshaking => "handshaking",
            LinkState::Authenticated => "authenticated",
            LinkState::Closing => "closing",
        };
        f.write_str(name)
    }
}
