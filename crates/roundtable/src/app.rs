//! Main application logic and lifecycle management.
//!
//! [`Application`] turns a loaded configuration into a running server: it
//! builds the quiz catalog, the scorers, the room directory and connection
//! registry, starts the transport, and drives the shutdown sequence.

use crate::{
    cli::CliArgs,
    config::{AppConfig, ScoringBackend},
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use game_server::GameServer;
use roundtable_core::{assemble, HttpScorer, Scorers};
use roundtable_events::ShutdownState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long the server task gets to stop rooms and close sockets.
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval of the periodic health report.
const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Main application struct.
pub struct Application {
    config: AppConfig,
    config_path: PathBuf,
    server: GameServer,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Load the quiz catalog and build the scorers
    /// 5. Wire the room directory and connection registry into a server
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(catalog) = args.quiz_catalog {
            config.quiz.catalog_path = Some(catalog.to_string_lossy().to_string());
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let settings = config.to_room_settings();
        let catalog = Arc::new(config.load_catalog()?);
        info!("📚 Quiz catalog ready: {:?}", catalog.ids());

        let scorers = build_scorers(&config)?;
        info!("🧮 Scorers: {:?}", scorers);

        let registry = assemble(settings, catalog, scorers);
        let server = GameServer::new(config.to_server_config()?, registry);

        Ok(Self {
            config,
            config_path: args.config_path,
            server,
        })
    }

    /// Runs until a termination signal, then shuts down in order.
    ///
    /// # Shutdown phases
    ///
    /// 1. Stop the health report and initiate the shared shutdown state
    /// 2. The server stops accepting, closes every room (players receive
    ///    `room_closed`) and closes every socket
    /// 3. Mark shutdown complete and log final statistics
    ///
    /// A second signal during shutdown exits immediately.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Roundtable Server Application");
        self.log_configuration_summary();

        let listener = self.server.bind().await?;
        let local_addr = listener.local_addr()?;
        let registry = self.server.registry();

        let shutdown_state = ShutdownState::new();
        let mut server_handle = {
            let server = self.server;
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move { server.serve(listener, shutdown_state).await })
        };

        let monitoring_handle = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_REPORT_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    info!(
                        "📊 System Health - {} rooms | {} connections",
                        registry.directory().room_count(),
                        registry.connection_count()
                    );
                }
            })
        };

        info!("✅ Roundtable Server is now running!");
        info!("🎮 Ready to accept connections on ws://{}", local_addr);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            signal = setup_signal_handlers() => signal?,
            finished = &mut server_handle => {
                monitoring_handle.abort();
                error!("❌ Server stopped unexpectedly");
                return match finished {
                    Ok(result) => result.map_err(Into::into),
                    Err(e) => Err(e.into()),
                };
            }
        }

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        info!("📡 Phase 1: Stopping new connections...");
        monitoring_handle.abort();
        shutdown_state.initiate_shutdown();

        info!("🏠 Phase 2: Closing rooms and connections...");
        match tokio::time::timeout(SERVER_STOP_TIMEOUT, server_handle).await {
            Ok(Ok(Ok(()))) => info!("✅ Server task completed gracefully"),
            Ok(Ok(Err(e))) => error!("❌ Server error during shutdown: {}", e),
            Ok(Err(e)) => error!("❌ Server task failed: {}", e),
            Err(_) => warn!(
                "⏰ Server task did not complete within {:?}, proceeding with cleanup",
                SERVER_STOP_TIMEOUT
            ),
        }
        shutdown_state.complete_shutdown();

        info!("📊 Final Statistics:");
        info!("  - Rooms still registered: {}", registry.directory().room_count());
        info!("  - Connections still registered: {}", registry.connection_count());
        info!("✅ Roundtable Server shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        let config = &self.config;
        info!("📋 Configuration Summary:");
        info!("  📂 Config file: {}", self.config_path.display());
        info!("  🌐 Bind address: {}", config.server.bind_address);
        info!("  👥 Max connections: {}", config.server.max_connections);
        info!("  ⏱️ Connection timeout: {}s", config.server.connection_timeout);
        info!(
            "  🏠 Rooms: {} players max, {}s rounds, idle after {}s",
            config.rooms.max_players, config.rooms.round_duration_secs, config.rooms.idle_timeout_secs
        );
        info!(
            "  🧮 Scoring: {:?} backend, {}ms timeout + {}ms grace",
            config.scoring.backend, config.scoring.timeout_ms, config.scoring.grace_ms
        );
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Builds the per-mode scorers. Quiz rounds are always graded locally; the
/// `http` backend replaces the word-mode judge.
fn build_scorers(config: &AppConfig) -> Result<Scorers, Box<dyn std::error::Error>> {
    let mut scorers = Scorers::local(config.rooms.quiz_points);
    if config.scoring.backend == ScoringBackend::Http {
        let endpoint = config
            .scoring
            .endpoint
            .clone()
            .ok_or("scoring.endpoint is required for the http backend")?;
        let timeout = Duration::from_millis(config.scoring.timeout_ms);
        scorers.word = Arc::new(HttpScorer::new(endpoint, timeout)?);
    }
    Ok(scorers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_build_scorers() {
        let config = AppConfig::default();
        let scorers = build_scorers(&config).unwrap();
        assert_ne!(scorers.word.name(), "http");

        let mut config = AppConfig::default();
        config.scoring.backend = ScoringBackend::Http;
        config.scoring.endpoint = Some("http://127.0.0.1:9/score".to_string());
        let scorers = build_scorers(&config).unwrap();
        assert_eq!(scorers.word.name(), "http");
        assert_ne!(scorers.quiz.name(), "http");
    }
}
