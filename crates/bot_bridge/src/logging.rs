//! Logging system setup.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// The configured level, raised to at least `debug` when frame logging is on.
pub fn filter_directive(settings: &LoggingSettings, frame_debug: bool) -> String {
    match settings.level.as_str() {
        "info" | "warn" | "error" if frame_debug => "debug".to_string(),
        level => level.to_string(),
    }
}

/// A valid `RUST_LOG` directive wins over `level`.
fn select_filter(env_directive: Option<&str>, level: &str) -> EnvFilter {
    env_directive
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
pub fn setup_logging(settings: &LoggingSettings, frame_debug: bool) -> Result<()> {
    let level = filter_directive(settings, frame_debug);
    let env_directive = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = select_filter(env_directive.as_deref(), &level);

    let registry = tracing_subscriber::registry().with(filter);
    if settings.json_format {
        registry
            .with(fmt::layer().json().with_target(false).with_thread_names(true))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_names(true))
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_debug_raises_quiet_levels() {
        let settings = LoggingSettings {
            level: "warn".to_string(),
            json_format: false,
        };
        assert_eq!(filter_directive(&settings, false), "warn");
        assert_eq!(filter_directive(&settings, true), "debug");

        let settings = LoggingSettings {
            level: "trace".to_string(),
            json_format: false,
        };
        assert_eq!(filter_directive(&settings, true), "trace");
    }

    #[test]
    fn test_rust_log_overrides_configured_level() {
        assert_eq!(select_filter(Some("bot_link=trace"), "info").to_string(), "bot_link=trace");
        assert_eq!(select_filter(None, "debug").to_string(), "debug");
    }
}
