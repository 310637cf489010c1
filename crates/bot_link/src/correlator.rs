//! Request/response correlation.
//!
//! A correlated call sends an EXEC frame stamped with a fresh callback id and
//! parks a oneshot waiter under that id. The RESPONSE frame carrying the same
//! id settles the waiter. Entries leave the table exactly once: through
//! [`RequestCorrelator::resolve`], or through the call's own guard when it
//! times out, fails to send, or is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::codec::{Frame, OpCode, Payload};
use crate::connection::outbound::FrameSink;
use crate::error::LinkError;

/// Process-wide so ids never repeat, even across managers or reconnects.
static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(0);

/// Callback id used for fire-and-forget EXEC frames. Never allocated to a
/// correlated call.
pub const UNCORRELATED_CALLBACK_ID: &str = "0";

/// Tracks outstanding correlated calls.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: DashMap<String, oneshot::Sender<Payload>>,
}

/// Removes its entry from the pending table when the call finishes for any
/// reason. A no-op if `resolve` already took the entry.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, oneshot::Sender<Payload>>,
    callback_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.callback_id);
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next callback id (`req_<n>`).
    pub fn next_callback_id(&self) -> String {
        format!("req_{}", NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Sends `operation` with `payload` through `sink` and waits up to
    /// `timeout` for the matching response.
    ///
    /// The returned payload is the response frame minus its `op` field.
    /// A timeout does not cancel anything on the wire; a response that
    /// arrives afterwards finds no waiter and is dropped.
    pub async fn call(
        &self,
        sink: &dyn FrameSink,
        operation: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, LinkError> {
        let callback_id = self.next_callback_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(callback_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            callback_id: callback_id.clone(),
        };

        let mut fields = payload;
        fields.insert("exec_op".to_string(), Value::from(operation));
        fields.insert("callback_id".to_string(), Value::from(callback_id.as_str()));
        sink.send_frame(Frame::new(OpCode::Exec, fields)).await?;
        debug!(op = operation, callback_id = %callback_id, "awaiting response");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(LinkError::Abandoned(callback_id)),
            Err(_) => {
                warn!(op = operation, callback_id = %callback_id, "request timed out after {:?}", timeout);
                Err(LinkError::Timeout {
                    operation: operation.to_string(),
                    callback_id,
                    timeout,
                })
            }
        }
    }

    /// Settles the waiter registered under `callback_id`, if any.
    ///
    /// Returns false when nothing was waiting (unknown, late or duplicate
    /// response).
    pub fn resolve(&self, callback_id: &str, payload: Payload) -> bool {
        match self.pending.remove(callback_id) {
            Some((_, waiter)) => {
                if waiter.send(payload).is_err() {
                    debug!(callback_id, "caller stopped waiting before the response arrived");
                }
                true
            }
            None => false,
        }
    }

    /// Number of calls still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, callback_id: &str) -> bool {
        self.pending.contains_key(callback_id)
    }
}
