//! Bot bridge entry point.
//!
//! Loads the configuration, registers the built-in exec handlers, and keeps
//! the link to the bot backend running until asked to shut down. SIGHUP
//! reloads the configuration file and restarts the link with it.

mod cli;
mod config;
mod handlers;
mod logging;
mod signals;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use bot_link::{ConfigProvider, ConnectionManager, HandlerRegistry};
use tracing::{error, info, warn};

use cli::CliArgs;
use config::{AppConfig, SharedConfig};
use signals::{SignalAction, SignalListener};

struct Application {
    args: CliArgs,
    config: Arc<SharedConfig>,
    registry: Arc<HandlerRegistry>,
    link: ConnectionManager,
}

/// Loads the file named on the command line and applies the CLI overrides.
async fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load_from_file(&args.config_path).await?;

    if let Some(endpoint) = &args.endpoint {
        config.link.endpoint = endpoint.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.debug {
        config.link.debug = true;
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

fn build_link(
    config: &AppConfig,
    shared: &Arc<SharedConfig>,
    registry: &Arc<HandlerRegistry>,
) -> ConnectionManager {
    let provider: Arc<dyn ConfigProvider> = shared.clone();
    ConnectionManager::with_settings(
        provider,
        registry.clone(),
        config.identity(),
        config.link_options(),
    )
}

impl Application {
    async fn new(args: CliArgs) -> Result<Self> {
        let config = load_config(&args).await?;
        logging::setup_logging(&config.logging, config.link.debug)?;

        info!("🚀 Bot bridge v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "📂 Config: {} | Endpoint: {} | Server: {}",
            args.config_path.display(),
            config.link.endpoint,
            config.server.name
        );

        let shared = Arc::new(SharedConfig::new(config.clone()));
        let registry = Arc::new(HandlerRegistry::new());
        handlers::register(&registry, shared.clone());
        info!("🔌 {} exec handlers registered", registry.handler_count());

        let link = build_link(&config, &shared, &registry);
        Ok(Self {
            args,
            config: shared,
            registry,
            link,
        })
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = SignalListener::new()?;
        self.link.start().await;
        info!("✅ Bot bridge is running");

        loop {
            match signals.next().await? {
                SignalAction::Shutdown => break,
                SignalAction::Reload => self.reload().await,
            }
        }

        info!("🛑 Shutdown signal received, closing the link...");
        self.link.stop().await;
        info!("👋 Bot bridge stopped");
        Ok(())
    }

    /// Re-reads the configuration file and restarts the link with it. A file
    /// that fails to load or validate leaves the running link untouched.
    async fn reload(&mut self) {
        let config = match load_config(&self.args).await {
            Ok(config) => config,
            Err(e) => {
                warn!("⚠️ Reload failed, keeping the current configuration: {:#}", e);
                return;
            }
        };

        info!("🔄 Reloading configuration from {}", self.args.config_path.display());
        self.link.stop().await;
        self.config.replace(config.clone());
        self.link = build_link(&config, &self.config, &self.registry);
        self.link.start().await;
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start bot bridge: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Bot bridge error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
