//! Logging setup and configuration.
//!
//! Initializes `tracing-subscriber` with an `EnvFilter` (`RUST_LOG` wins over
//! the configured level) and either a human-readable or a JSON `fmt` layer.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sets up the global subscriber.
///
/// `json_format` forces JSON output regardless of `config.json_format`.
/// Fails if a global subscriber is already installed.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(fmt::layer()
                .json()
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer()
                .with_ansi(true)
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Displays the startup banner through the logger.
pub fn display_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("╔══════════════════════════════════════════╗");
    info!("║           🎲 ROUNDTABLE SERVER 🎲         ║");
    info!("║                 v{:<8}                ║", version);
    info!("║                                          ║");
    info!("║  Rooms and rounds for word & quiz games  ║");
    info!("║                                          ║");
    info!("║  🏠 One actor per room                   ║");
    info!("║  ⏱️  Server-side round deadlines          ║");
    info!("║  🔁 Reconnect with full resync           ║");
    info!("║                                          ║");
    info!("╚══════════════════════════════════════════╝");
}
