//! Client -> server keepalive.
//!
//! The backend announces an expiry interval in HELLO. After AUTH_ACK the
//! client sends an empty HEARTBEAT frame `lead` seconds before each expiry,
//! the first one a full period after activation. The backend is not expected
//! to heartbeat back.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::codec::{Frame, OpCode};
use crate::connection::outbound::FrameSink;

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Period between keepalives for a backend expiry interval, never shorter
/// than one second.
pub fn heartbeat_period(interval_secs: u64, lead: Duration) -> Duration {
    Duration::from_secs(interval_secs)
        .saturating_sub(lead)
        .max(MIN_PERIOD)
}

/// Owns at most one running keepalive task.
#[derive(Debug, Default)]
pub struct Heartbeat {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts sending keepalives every `period` through `sink`.
    ///
    /// Any previous task is cancelled and awaited first, so two timers never
    /// run side by side. The task ends quietly once the sink reports it is
    /// closed or a send fails.
    pub async fn start(&self, period: Duration, sink: Arc<dyn FrameSink>) {
        let mut slot = self.task.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
            let _ = previous.await;
        }

        debug!("💓 Heartbeat every {:?}", period);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !sink.is_open() {
                    break;
                }
                if let Err(e) = sink.send_frame(Frame::empty(OpCode::Heartbeat)).await {
                    debug!("Heartbeat stopped: {}", e);
                    break;
                }
                trace!("💓 heartbeat sent");
            }
        }));
    }

    /// Cancels the running task, if any, and waits for it to finish.
    pub async fn stop(&self) {
        let mut slot = self.task.lock().await;
        if let Some(task) = slot.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Whether a keepalive task is currently running.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}
