//! The single outbound path to the socket.
//!
//! Handlers, the heartbeat and correlated calls all send through one
//! [`Outbound`]; its mutex guarantees whole frames go out one at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::codec::{self, Frame};
use crate::error::LinkError;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;

/// How long closing waits for a send stuck on a stalled socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Anything frames can be sent through.
///
/// The connection manager's socket implements this; tests substitute a
/// recording sink.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Sends one frame, failing with [`LinkError::NotConnected`] when there is
    /// no open socket.
    async fn send_frame(&self, frame: Frame) -> Result<(), LinkError>;

    /// Whether a socket is currently open.
    fn is_open(&self) -> bool;
}

/// Websocket-backed sink shared by everything that writes to the backend.
pub(crate) struct Outbound {
    sink: Mutex<Option<WsSink>>,
    open: AtomicBool,
    frame_logging: AtomicBool,
}

impl Outbound {
    pub(crate) fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            open: AtomicBool::new(false),
            frame_logging: AtomicBool::new(false),
        }
    }

    /// Installs the write half of a freshly opened socket.
    pub(crate) async fn attach(&self, sink: WsSink, frame_logging: bool) {
        let mut slot = self.sink.lock().await;
        *slot = Some(sink);
        self.frame_logging.store(frame_logging, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
    }

    /// Drops the write half. Later sends fail with `NotConnected`.
    pub(crate) async fn detach(&self) {
        self.open.store(false, Ordering::SeqCst);
        let detaching = async {
            let mut slot = self.sink.lock().await;
            if let Some(mut sink) = slot.take() {
                let _ = sink.close().await;
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, detaching).await.is_err() {
            warn!("Socket still busy after {:?}, leaving it to the stalled send", CLOSE_TIMEOUT);
        }
    }

    /// Sends a close frame with `reason` and drops the write half.
    ///
    /// Gives up after [`CLOSE_TIMEOUT`] if another send holds the socket.
    /// The socket is already marked closed by then, so nothing new is sent.
    pub(crate) async fn close(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let closing = async {
            let mut slot = self.sink.lock().await;
            if let Some(mut sink) = slot.take() {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.to_string().into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!("Close frame not delivered: {}", e);
                }
                let _ = sink.close().await;
            }
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, closing).await.is_err() {
            warn!("Close frame not sent within {:?}, giving up", CLOSE_TIMEOUT);
        }
    }

    pub(crate) fn frame_logging(&self) -> bool {
        self.frame_logging.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FrameSink for Outbound {
    async fn send_frame(&self, frame: Frame) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::NotConnected);
        }
        let text = codec::encode(&frame)?;

        let mut slot = self.sink.lock().await;
        let sink = slot.as_mut().ok_or(LinkError::NotConnected)?;
        if self.frame_logging() {
            info!("send: {}", text);
        } else {
            trace!("send: {}", text);
        }
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OpCode;

    #[tokio::test]
    async fn detached_outbound_refuses_frames() {
        let outbound = Outbound::new();
        assert!(!outbound.is_open());
        let err = outbound.send_frame(Frame::empty(OpCode::Heartbeat)).await.unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
    }

    #[tokio::test]
    async fn close_without_socket_is_harmless() {
        let outbound = Outbound::new();
        outbound.close("shutting down").await;
        outbound.close("shutting down").await;
        outbound.detach().await;
        assert!(!outbound.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn close_gives_up_on_a_stalled_send() {
        let outbound = Outbound::new();
        outbound.open.store(true, Ordering::SeqCst);
        // Stands in for a send stuck on a socket that stopped draining.
        let _busy = outbound.sink.lock().await;

        let started = tokio::time::Instant::now();
        outbound.close("shutting down").await;
        outbound.detach().await;

        assert!(started.elapsed() >= CLOSE_TIMEOUT * 2);
        assert!(!outbound.is_open());
        let err = outbound.send_frame(Frame::empty(OpCode::Heartbeat)).await.unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
    }
}
