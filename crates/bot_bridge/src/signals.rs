//! Signal handling for shutdown and configuration reload.

use tokio::signal;
use tracing::info;

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    Reload,
}

/// Listens for process signals.
///
/// SIGINT and SIGTERM ask for shutdown and SIGHUP for a reload on unix; on
/// other platforms only Ctrl+C is handled.
pub struct SignalListener {
    #[cfg(unix)]
    sigint: signal::unix::Signal,
    #[cfg(unix)]
    sigterm: signal::unix::Signal,
    #[cfg(unix)]
    sighup: signal::unix::Signal,
}

impl SignalListener {
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use signal::unix::{signal, SignalKind};
            Ok(Self {
                sigint: signal(SignalKind::interrupt())?,
                sigterm: signal(SignalKind::terminate())?,
                sighup: signal(SignalKind::hangup())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Waits for the next signal.
    pub async fn next(&mut self) -> std::io::Result<SignalAction> {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.sigint.recv() => {
                    info!("📡 Received SIGINT");
                    Ok(SignalAction::Shutdown)
                }
                _ = self.sigterm.recv() => {
                    info!("📡 Received SIGTERM");
                    Ok(SignalAction::Shutdown)
                }
                _ = self.sighup.recv() => {
                    info!("📡 Received SIGHUP");
                    Ok(SignalAction::Reload)
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("📡 Received Ctrl+C");
            Ok(SignalAction::Shutdown)
        }
    }
}
