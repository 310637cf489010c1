//! The connection manager.
//!
//! A [`ConnectionManager`] runs one supervisory task per `start()`. That task
//! sleeps the backoff delay, opens the websocket, and runs the receive loop
//! until the socket closes; then it tears the session down and goes around
//! again. Only [`ConnectionManager::stop`] ends it.
//!
//! Inbound frames are handled strictly in arrival order by the receive loop.
//! EXEC frames are queued to one dispatch worker per connection, which runs
//! them through the [`HandlerRegistry`] one at a time in the order they
//! arrived. A handler that calls back into the backend never blocks the loop
//! that has to read the answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitStream;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, trace, warn};

use super::backoff::ReconnectState;
use super::outbound::{FrameSink, Outbound, WsStream};
use super::LinkState;
use crate::codec::{self, Frame, OpCode, Payload};
use crate::config::{ClientIdentity, ConfigProvider, LinkConfig, LinkOptions};
use crate::correlator::{RequestCorrelator, UNCORRELATED_CALLBACK_ID};
use crate::dispatcher::{ExecContext, HandlerRegistry};
use crate::error::LinkError;
use crate::heartbeat::{heartbeat_period, Heartbeat};
use crate::session::SessionState;

const CLOSE_REASON: &str = "bridge closed the connection";

/// One EXEC frame waiting for the dispatch worker.
type ExecJob = (ExecContext, Payload, Option<Arc<SessionState>>);

/// Owner of the persistent link to the bot backend.
///
/// Cloning is cheap and every clone drives the same connection, so handlers
/// can hold one to call back into the backend.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<dyn ConfigProvider>,
    registry: Arc<HandlerRegistry>,
    identity: ClientIdentity,
    options: LinkOptions,
    correlator: RequestCorrelator,
    outbound: Arc<Outbound>,
    heartbeat: Heartbeat,
    session: RwLock<Option<Arc<SessionState>>>,
    state: watch::Sender<LinkState>,
    active: AtomicBool,
    manual_stop: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    stop_tx: Option<watch::Sender<bool>>,
    supervisor: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("active", &self.is_active())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager with the default identity and timings.
    pub fn new(config: Arc<dyn ConfigProvider>, registry: Arc<HandlerRegistry>) -> Self {
        Self::with_settings(config, registry, ClientIdentity::default(), LinkOptions::default())
    }

    pub fn with_settings(
        config: Arc<dyn ConfigProvider>,
        registry: Arc<HandlerRegistry>,
        identity: ClientIdentity,
        options: LinkOptions,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                identity,
                options,
                correlator: RequestCorrelator::new(),
                outbound: Arc::new(Outbound::new()),
                heartbeat: Heartbeat::new(),
                session: RwLock::new(None),
                state,
                active: AtomicBool::new(false),
                manual_stop: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Launches the supervisory loop. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.active.load(Ordering::SeqCst) {
            debug!("Link already active, ignoring start");
            return;
        }

        self.inner.manual_stop.store(false, Ordering::SeqCst);
        self.inner.active.store(true, Ordering::SeqCst);

        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = self.inner.clone();
        lifecycle.stop_tx = Some(stop_tx);
        lifecycle.supervisor = Some(tokio::spawn(async move {
            inner.supervise(stop_rx).await;
        }));
        info!("🚀 Bot link started");
    }

    /// Stops the link and closes any open socket.
    ///
    /// Returns once the supervisory loop has torn down the session, leaving
    /// the manager idle. Safe to call repeatedly or while never started.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.inner.manual_stop.store(true, Ordering::SeqCst);
        self.inner.active.store(false, Ordering::SeqCst);

        if let Some(stop_tx) = lifecycle.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        self.inner.outbound.close(CLOSE_REASON).await;

        if let Some(supervisor) = lifecycle.supervisor.take() {
            self.inner.set_state(LinkState::Closing);
            if let Err(e) = supervisor.await {
                if e.is_panic() {
                    error!("❌ Link supervisor panicked: {}", e);
                }
            }
            self.inner.teardown().await;
            info!("🛑 Bot link stopped");
        }
        self.inner.set_state(LinkState::Idle);
    }

    /// Sends `operation` and waits up to `timeout` for the backend's answer.
    pub async fn call(
        &self,
        operation: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, LinkError> {
        if !self.is_active() {
            return Err(LinkError::NotConnected);
        }
        self.inner
            .correlator
            .call(self.inner.outbound.as_ref(), operation, payload, timeout)
            .await
    }

    /// Sends `operation` without waiting for any answer.
    pub async fn send(&self, operation: &str, payload: Payload) -> Result<(), LinkError> {
        if !self.is_active() {
            return Err(LinkError::NotConnected);
        }
        let mut fields = payload;
        fields.insert("exec_op".to_string(), Value::from(operation));
        fields.insert("callback_id".to_string(), Value::from(UNCORRELATED_CALLBACK_ID));
        self.inner
            .outbound
            .send_frame(Frame::new(OpCode::Exec, fields))
            .await
    }

    /// The registry inbound EXEC frames are dispatched to.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    pub fn options(&self) -> &LinkOptions {
        &self.inner.options
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// The current session, if a HELLO has been received on this connection.
    pub async fn session(&self) -> Option<Arc<SessionState>> {
        self.inner.session.read().await.clone()
    }

    /// Whether the supervisory loop is running.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Correlated calls still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }
}

impl Inner {
    fn set_state(&self, next: LinkState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Link state {} -> {}", previous, next);
        }
    }

    fn should_run(&self, stop_rx: &watch::Receiver<bool>) -> bool {
        self.active.load(Ordering::SeqCst)
            && !self.manual_stop.load(Ordering::SeqCst)
            && !*stop_rx.borrow()
    }

    /// Sleeps for `delay` unless a stop arrives first. Returns false on stop.
    async fn pause(&self, delay: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
        if !self.should_run(stop_rx) {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => self.should_run(stop_rx),
            _ = stop_rx.changed() => false,
        }
    }

    async fn supervise(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let mut attempts = ReconnectState::default();

        while self.should_run(&stop_rx) {
            self.set_state(LinkState::Connecting);
            let delay = attempts.next_delay(&self.options.reconnect);
            debug!(attempt = attempts.attempts(), delay_ms = delay.as_millis() as u64, "reconnect backoff");
            if !self.pause(delay, &mut stop_rx).await {
                break;
            }

            // Resolved per attempt so configuration reloads apply on reconnect.
            let config = self.config.snapshot();
            let outcome = self.run_connection(&config, &mut attempts, &mut stop_rx).await;
            self.teardown().await;

            match outcome {
                Ok(()) => {}
                Err(e) if e.is_connection_failure() => {
                    let attempt = attempts.record_failure();
                    error!("⚠️ Connection error: {} (attempt {})", e, attempt);
                }
                Err(e) => {
                    error!("❌ Unexpected link error: {}", e);
                    if !self.pause(self.options.reconnect.error_pause, &mut stop_rx).await {
                        break;
                    }
                }
            }
        }
        debug!("Link supervisor exiting");
    }

    /// Opens one socket and serves it until it closes.
    ///
    /// `Ok(())` means the connection ended after a HELLO or because of a stop;
    /// an error means it never got that far or broke.
    async fn run_connection(
        &self,
        config: &LinkConfig,
        attempts: &mut ReconnectState,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), LinkError> {
        let (stream, _) = tokio::select! {
            connected = connect_async(config.endpoint.as_str()) => connected?,
            _ = stop_rx.changed() => return Ok(()),
        };
        info!("🔗 Connected to bot backend at {}", config.endpoint);

        let (sink, mut read) = stream.split();
        self.outbound.attach(sink, config.debug).await;
        self.set_state(LinkState::Handshaking);

        // The worker exits once the sender drops with this function and the
        // queue is drained.
        let (exec_tx, exec_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_exec_worker(self.registry.clone(), exec_rx));

        self.receive_loop(&mut read, config, attempts, stop_rx, &exec_tx).await
    }

    async fn receive_loop(
        &self,
        read: &mut SplitStream<WsStream>,
        config: &LinkConfig,
        attempts: &mut ReconnectState,
        stop_rx: &watch::Receiver<bool>,
        exec_tx: &mpsc::UnboundedSender<ExecJob>,
    ) -> Result<(), LinkError> {
        let mut greeted = false;

        loop {
            if !self.should_run(stop_rx) {
                return Ok(());
            }

            // The timeout only exists to re-check the flags above.
            let next = match tokio::time::timeout(self.options.recv_poll_interval, read.next()).await {
                Ok(next) => next,
                Err(_) => continue,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(e.into()),
                None => return closed(greeted),
            };

            match message {
                Message::Text(text) => {
                    self.handle_text(text.as_str(), config, attempts, &mut greeted, exec_tx)
                        .await?;
                }
                Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        self.handle_text(text, config, attempts, &mut greeted, exec_tx)
                            .await?
                    }
                    Err(_) => warn!("Dropping non UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Message::Close(frame) => {
                    match frame {
                        Some(frame) => info!(
                            "Connection closed: {} {}",
                            u16::from(frame.code),
                            frame.reason.as_str()
                        ),
                        None => info!("Connection closed"),
                    }
                    return closed(greeted);
                }
                // tungstenite answers pings on its own
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn handle_text(
        &self,
        text: &str,
        config: &LinkConfig,
        attempts: &mut ReconnectState,
        greeted: &mut bool,
        exec_tx: &mpsc::UnboundedSender<ExecJob>,
    ) -> Result<(), LinkError> {
        if config.debug {
            info!("recv: {}", text);
        } else {
            trace!("recv: {}", text);
        }

        let frame = match codec::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                return Ok(());
            }
        };

        match frame.opcode() {
            Some(OpCode::Hello) => {
                let session = SessionState::from_hello(&frame.payload)?;
                attempts.reset();
                *greeted = true;
                info!(
                    "🤝 Backend core {}-{} [{}], heartbeat {}s, session {}",
                    session.version, session.system, session.runtime, session.interval, session.session_id
                );
                *self.session.write().await = Some(Arc::new(session));
                self.send_auth(config).await?;
            }
            Some(OpCode::AuthAck) => {
                let server_name = frame
                    .str_field("server_name")
                    .ok_or_else(|| LinkError::Protocol("auth ack without server_name".to_string()))?;
                let session = {
                    let mut slot = self.session.write().await;
                    let current = slot
                        .as_ref()
                        .ok_or_else(|| LinkError::Protocol("auth ack before hello".to_string()))?;
                    let acked = Arc::new(current.with_server_name(server_name.as_str()));
                    *slot = Some(acked.clone());
                    acked
                };
                info!("✅ Authenticated with bot backend as [{}]", server_name);

                let period = heartbeat_period(session.interval, self.options.heartbeat_lead);
                let sink: Arc<dyn FrameSink> = self.outbound.clone();
                self.heartbeat.start(period, sink).await;
                self.set_state(LinkState::Authenticated);
            }
            Some(OpCode::Heartbeat) => trace!("Heartbeat from backend ignored"),
            Some(OpCode::Exec) => self.dispatch_exec(frame, exec_tx).await,
            Some(OpCode::Response) => self.resolve_response(frame),
            Some(OpCode::Auth) => debug!("Ignoring auth frame sent by the backend"),
            None => debug!("Ignoring frame with unknown op {}", frame.op),
        }
        Ok(())
    }

    async fn send_auth(&self, config: &LinkConfig) -> Result<(), LinkError> {
        if config.token.is_empty() {
            warn!("Authenticating with an empty token");
        }
        let mut fields = Payload::new();
        fields.insert("token".to_string(), Value::from(config.token.as_str()));
        fields.insert(
            "plugin_version".to_string(),
            Value::from(self.identity.plugin_version.as_str()),
        );
        fields.insert(
            "server_description".to_string(),
            Value::from(self.identity.server_description.as_str()),
        );
        info!("🔑 Sending authentication as {}", self.identity.server_description);
        self.outbound.send_frame(Frame::new(OpCode::Auth, fields)).await
    }

    async fn dispatch_exec(&self, frame: Frame, exec_tx: &mpsc::UnboundedSender<ExecJob>) {
        let Some(exec_op) = frame.str_field("exec_op") else {
            warn!("Dropping exec frame without exec_op");
            return;
        };
        let Some(callback_id) = frame.str_field("callback_id") else {
            warn!("Dropping exec frame {} without callback_id", exec_op);
            return;
        };

        let sink: Arc<dyn FrameSink> = self.outbound.clone();
        let ctx = ExecContext::new(callback_id, exec_op, sink);
        let session = self.session.read().await.clone();
        if exec_tx.send((ctx, frame.payload, session)).is_err() {
            warn!("Dispatch worker is gone, dropping exec frame");
        }
    }

    fn resolve_response(&self, frame: Frame) {
        let Some(callback_id) = frame.str_field("callback_id") else {
            warn!("Dropping response without callback_id");
            return;
        };
        if !self.correlator.resolve(&callback_id, frame.payload) {
            warn!(callback_id = %callback_id, "Dropping response with no pending request");
        }
    }

    /// Drops everything tied to the connection that just ended.
    async fn teardown(&self) {
        self.heartbeat.stop().await;
        self.outbound.detach().await;
        *self.session.write().await = None;
    }
}

/// Runs queued EXEC frames one after another in arrival order.
async fn run_exec_worker(
    registry: Arc<HandlerRegistry>,
    mut jobs: mpsc::UnboundedReceiver<ExecJob>,
) {
    while let Some((ctx, payload, session)) = jobs.recv().await {
        registry.dispatch(ctx, payload, session).await;
    }
    trace!("Dispatch worker finished");
}

/// Outcome of a socket that closed without an error.
fn closed(greeted: bool) -> Result<(), LinkError> {
    if greeted {
        Ok(())
    } else {
        Err(LinkError::WebSocket(tungstenite::Error::ConnectionClosed))
    }
}
