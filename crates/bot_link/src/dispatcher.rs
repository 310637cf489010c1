//! Exec handler registry and dispatch.
//!
//! Collaborators register handlers against an exec operation name (for
//! example `RUN_COMMAND` or `GET_SERVER_INFO`). When the backend sends an EXEC
//! frame, every handler registered for its `exec_op` runs in registration
//! order. A handler that fails, or panics, is logged and the next one still
//! runs.
//!
//! ```rust,no_run
//! use bot_link::{HandlerRegistry, HandlerError};
//! use serde_json::json;
//!
//! let registry = HandlerRegistry::new();
//!
//! // Plain handler
//! registry.on("SEND_TO_CHAT", |_ctx, data, _session| {
//!     println!("chat: {}", data["text"]);
//!     Ok(())
//! });
//!
//! // Handler that answers the backend
//! registry.on_async("GET_SERVER_INFO", |ctx, _data, _session| async move {
//!     let mut info = serde_json::Map::new();
//!     info.insert("server_name".into(), json!("survival"));
//!     ctx.respond(info).await?;
//!     Ok::<(), HandlerError>(())
//! });
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::codec::{Frame, OpCode, Payload};
use crate::connection::outbound::FrameSink;
use crate::error::{HandlerError, LinkError};
use crate::session::SessionState;

/// Context handed to every handler of one inbound EXEC frame.
///
/// Cloning is cheap; all clones share the response counter.
#[derive(Clone)]
pub struct ExecContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    callback_id: String,
    exec_op: String,
    sink: Arc<dyn FrameSink>,
    responses: AtomicUsize,
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("callback_id", &self.inner.callback_id)
            .field("exec_op", &self.inner.exec_op)
            .field("responses", &self.response_count())
            .finish()
    }
}

impl ExecContext {
    pub fn new(
        callback_id: impl Into<String>,
        exec_op: impl Into<String>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                callback_id: callback_id.into(),
                exec_op: exec_op.into(),
                sink,
                responses: AtomicUsize::new(0),
            }),
        }
    }

    pub fn callback_id(&self) -> &str {
        &self.inner.callback_id
    }

    pub fn exec_op(&self) -> &str {
        &self.inner.exec_op
    }

    /// Number of responses sent so far for this command.
    pub fn response_count(&self) -> usize {
        self.inner.responses.load(Ordering::SeqCst)
    }

    /// Answers the backend with a RESPONSE frame carrying this command's
    /// callback id and operation, merged with `payload`.
    ///
    /// At most one response is expected per command. Extra responses are
    /// still sent but logged as a warning.
    pub async fn respond(&self, payload: Payload) -> Result<(), LinkError> {
        let previous = self.inner.responses.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            warn!(
                exec_op = %self.inner.exec_op,
                callback_id = %self.inner.callback_id,
                "responding {} times to a single exec command",
                previous + 1
            );
        }

        let mut fields = payload;
        fields.insert(
            "callback_id".to_string(),
            Value::from(self.inner.callback_id.as_str()),
        );
        fields.insert("exec_op".to_string(), Value::from(self.inner.exec_op.as_str()));
        self.inner.sink.send_frame(Frame::new(OpCode::Response, fields)).await
    }
}

/// A handler for one exec operation.
///
/// Most code registers closures through [`HandlerRegistry::on`] and
/// [`HandlerRegistry::on_async`] instead of implementing this directly.
#[async_trait]
pub trait ExecHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: ExecContext,
        payload: Payload,
        session: Option<Arc<SessionState>>,
    ) -> Result<(), HandlerError>;

    /// Human-readable name used in logs.
    fn handler_name(&self) -> &str;
}

struct FnHandler<F> {
    name: String,
    handler: F,
}

#[async_trait]
impl<F> ExecHandler for FnHandler<F>
where
    F: Fn(&ExecContext, &Payload, Option<&SessionState>) -> Result<(), HandlerError>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        ctx: ExecContext,
        payload: Payload,
        session: Option<Arc<SessionState>>,
    ) -> Result<(), HandlerError> {
        (self.handler)(&ctx, &payload, session.as_deref())
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

struct AsyncFnHandler<F> {
    name: String,
    handler: F,
}

#[async_trait]
impl<F, Fut> ExecHandler for AsyncFnHandler<F>
where
    F: Fn(ExecContext, Payload, Option<Arc<SessionState>>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(
        &self,
        ctx: ExecContext,
        payload: Payload,
        session: Option<Arc<SessionState>>,
    ) -> Result<(), HandlerError> {
        (self.handler)(ctx, payload, session).await
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// Exec operation name -> handlers, in registration order.
///
/// Registrations are additive and live as long as the registry. The registry
/// is an ordinary value: build one at startup, register against it, and hand
/// it to the connection manager.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Vec<Arc<dyn ExecHandler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operations", &self.handlers.len())
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for `exec_op`.
    pub fn register(&self, exec_op: &str, handler: Arc<dyn ExecHandler>) {
        debug!("Registered handler {} for {}", handler.handler_name(), exec_op);
        self.handlers
            .entry(exec_op.to_string())
            .or_default()
            .push(handler);
    }

    /// Registers a synchronous handler.
    pub fn on<F>(&self, exec_op: &str, handler: F)
    where
        F: Fn(&ExecContext, &Payload, Option<&SessionState>) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        let name = format!("{}#{}", exec_op, self.count_for(exec_op));
        self.register(exec_op, Arc::new(FnHandler { name, handler }));
    }

    /// Registers a handler that returns a future.
    pub fn on_async<F, Fut>(&self, exec_op: &str, handler: F)
    where
        F: Fn(ExecContext, Payload, Option<Arc<SessionState>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let name = format!("{}#{}", exec_op, self.count_for(exec_op));
        self.register(exec_op, Arc::new(AsyncFnHandler { name, handler }));
    }

    /// Number of handlers registered for `exec_op`.
    pub fn count_for(&self, exec_op: &str) -> usize {
        self.handlers.get(exec_op).map_or(0, |list| list.len())
    }

    /// Total number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.iter().map(|entry| entry.value().len()).sum()
    }

    /// Runs every handler registered for `ctx.exec_op()` in order.
    ///
    /// Each handler finishes before the next one starts. Errors and panics are
    /// logged per handler and never returned; the return value is the number
    /// of handlers that completed successfully.
    pub async fn dispatch(
        &self,
        ctx: ExecContext,
        payload: Payload,
        session: Option<Arc<SessionState>>,
    ) -> usize {
        // Snapshot so registrations made by a running handler don't deadlock
        // against the map shard we'd otherwise be holding.
        let handlers = match self.handlers.get(ctx.exec_op()) {
            Some(list) => list.value().clone(),
            None => {
                debug!("No handlers registered for exec_op={}", ctx.exec_op());
                return 0;
            }
        };

        let mut succeeded = 0;
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(ctx.clone(), payload.clone(), session.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    error!(
                        "❌ Handler {} failed for exec_op={}: {}",
                        handler.handler_name(),
                        ctx.exec_op(),
                        e
                    );
                }
                Err(panic) => {
                    error!(
                        "❌ Handler {} panicked for exec_op={}: {}",
                        handler.handler_name(),
                        ctx.exec_op(),
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        if ctx.response_count() == 0 {
            debug!(
                exec_op = ctx.exec_op(),
                callback_id = ctx.callback_id(),
                "exec command finished without a response"
            );
        }
        succeeded
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::outbound::testing::RecordingSink;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn context(exec_op: &str) -> (ExecContext, tokio::sync::mpsc::UnboundedReceiver<Frame>) {
        let (sink, frames) = RecordingSink::new();
        (ExecContext::new("cb-7", exec_op, Arc::new(sink)), frames)
    }

    #[tokio::test]
    async fn handlers_run_in_order_even_after_failures() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let log = calls.clone();
        registry.on("RUN_COMMAND", move |_, _, _| {
            log.lock().unwrap().push("first");
            Err(HandlerError::Failed("rcon offline".into()))
        });
        let log = calls.clone();
        registry.on_async("RUN_COMMAND", move |_, _, _| {
            let log = log.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                log.lock().unwrap().push("second");
                Ok::<(), HandlerError>(())
            }
        });
        let log = calls.clone();
        registry.on("RUN_COMMAND", move |_, _, _| {
            log.lock().unwrap().push("third");
            Ok(())
        });

        let (ctx, _frames) = context("RUN_COMMAND");
        let succeeded = registry.dispatch(ctx, Payload::new(), None).await;

        assert_eq!(succeeded, 2);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        let registry = HandlerRegistry::new();
        let reached = Arc::new(Mutex::new(false));

        registry.on("SEND_TO_CHAT", |_, _, _| panic!("boom"));
        let flag = reached.clone();
        registry.on("SEND_TO_CHAT", move |_, _, _| {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        let (ctx, _frames) = context("SEND_TO_CHAT");
        assert_eq!(registry.dispatch(ctx, Payload::new(), None).await, 1);
        assert!(*reached.lock().unwrap());
    }

    #[tokio::test]
    async fn respond_sends_response_with_callback_id_and_op() {
        let registry = HandlerRegistry::new();
        registry.on_async("GET_SERVER_INFO", |ctx, _, _| async move {
            let mut info = Payload::new();
            info.insert("server_name".into(), json!("lobby"));
            ctx.respond(info).await?;
            Ok::<(), HandlerError>(())
        });

        let (ctx, mut frames) = context("GET_SERVER_INFO");
        registry.dispatch(ctx.clone(), Payload::new(), None).await;

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.opcode(), Some(OpCode::Response));
        assert_eq!(frame.payload["callback_id"], json!("cb-7"));
        assert_eq!(frame.payload["exec_op"], json!("GET_SERVER_INFO"));
        assert_eq!(frame.payload["server_name"], json!("lobby"));
        assert_eq!(ctx.response_count(), 1);
    }

    #[tokio::test]
    async fn multiple_responses_are_all_sent() {
        let (ctx, mut frames) = context("RUN_COMMAND");
        ctx.respond(Payload::new()).await.unwrap();
        ctx.respond(Payload::new()).await.unwrap();
        assert_eq!(ctx.response_count(), 2);
        assert!(frames.recv().await.is_some());
        assert!(frames.recv().await.is_some());
    }

    #[tokio::test]
    async fn handlers_see_payload_and_session() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        registry.on("PLAYER_LIST", move |_, data, session| {
            let name = session.and_then(|s| s.server_name.clone());
            *slot.lock().unwrap() = Some((data["page"].clone(), name));
            Ok(())
        });

        let session = SessionState {
            version: "1".into(),
            system: "linux".into(),
            runtime: "8".into(),
            session_id: "s".into(),
            token: None,
            interval: 40,
            server_name: Some("hub".into()),
        };
        let mut payload = Payload::new();
        payload.insert("page".into(), json!(2));

        let (ctx, _frames) = context("PLAYER_LIST");
        registry.dispatch(ctx, payload, Some(Arc::new(session))).await;

        let (page, name) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(page, json!(2));
        assert_eq!(name.as_deref(), Some("hub"));
    }

    #[tokio::test]
    async fn unknown_operation_runs_nothing() {
        let registry = HandlerRegistry::new();
        registry.on("A", |_, _, _| Ok(()));
        let (ctx, _frames) = context("B");
        assert_eq!(registry.dispatch(ctx, Payload::new(), None).await, 0);
        assert_eq!(registry.count_for("A"), 1);
        assert_eq!(registry.handler_count(), 1);
    }
}
