//! Configuration management for the Roundtable server.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files and command-line arguments.

use game_server::config::SecurityConfig;
use game_server::ServerConfig;
use roundtable_core::{CoreError, QuizCatalog, RoomSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Transport settings
    pub server: ServerSettings,
    /// Room behaviour
    #[serde(default)]
    pub rooms: RoomsSettings,
    /// Where rounds get scored
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub quiz: QuizSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to bind the WebSocket listener to
    pub bind_address: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds a silent connection is kept open (0 disables)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(default)]
    pub security: SecurityConfig,
}

fn default_max_connections() -> usize {
    1000
}

pub fn default_connection_timeout() -> u64 {
    300
}

/// Room defaults. A room's creating join may override mode, categories,
/// round duration and `anyone_can_start` within these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsSettings {
    pub round_duration_secs: u64,
    pub max_players: usize,
    /// Seconds a room with nobody connected is kept
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
    pub inbox_capacity: usize,
    pub default_categories: Vec<String>,
    /// Rounds per word-mode game
    pub word_rounds: usize,
    /// Letters never drawn in word mode, e.g. "QXY"
    pub excluded_letters: String,
    /// Points for a correct quiz answer
    pub quiz_points: u32,
    pub word_anyone_can_start: bool,
    pub quiz_anyone_can_start: bool,
}

impl Default for RoomsSettings {
    fn default() -> Self {
        let defaults = RoomSettings::default();
        Self {
            round_duration_secs: defaults.round_duration.as_secs(),
            max_players: defaults.max_players,
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
            reap_interval_secs: defaults.reap_interval.as_secs(),
            inbox_capacity: defaults.inbox_capacity,
            default_categories: defaults.default_categories,
            word_rounds: defaults.word_rounds,
            excluded_letters: defaults.excluded_letters.iter().collect(),
            quiz_points: defaults.quiz_points,
            word_anyone_can_start: defaults.word_anyone_can_start,
            quiz_anyone_can_start: defaults.quiz_anyone_can_start,
        }
    }
}

/// Which scorer grades word-mode rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringBackend {
    /// In-process letter-rule judge
    Local,
    /// External validator reached over HTTP
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub backend: ScoringBackend,
    /// Validator URL, required for the `http` backend
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    /// Extra wait after `timeout_ms` before a room scores without the validator
    pub grace_ms: u64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            backend: ScoringBackend::Local,
            endpoint: None,
            timeout_ms: 5000,
            grace_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizSettings {
    /// JSON file of `{id: quiz}` loaded on top of the built-in sample quiz
    pub catalog_path: Option<String>,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:8080".to_string(),
                max_connections: default_max_connections(),
                connection_timeout: default_connection_timeout(),
                security: SecurityConfig::default(),
            },
            rooms: RoomsSettings::default(),
            scoring: ScoringSettings::default(),
            quiz: QuizSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the transport part of the configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_connections: self.server.max_connections,
            connection_timeout: self.server.connection_timeout,
            security: self.server.security.clone(),
        })
    }

    /// Converts the room part of the configuration.
    pub fn to_room_settings(&self) -> RoomSettings {
        let rooms = &self.rooms;
        RoomSettings {
            round_duration: Duration::from_secs(rooms.round_duration_secs),
            max_players: rooms.max_players,
            idle_timeout: Duration::from_secs(rooms.idle_timeout_secs),
            reap_interval: Duration::from_secs(rooms.reap_interval_secs),
            inbox_capacity: rooms.inbox_capacity,
            default_categories: rooms.default_categories.clone(),
            word_rounds: rooms.word_rounds,
            excluded_letters: rooms
                .excluded_letters
                .chars()
                .filter(|c| c.is_ascii_alphabetic())
                .map(|c| c.to_ascii_uppercase())
                .collect(),
            quiz_points: rooms.quiz_points,
            word_anyone_can_start: rooms.word_anyone_can_start,
            quiz_anyone_can_start: rooms.quiz_anyone_can_start,
            scoring_timeout: Duration::from_millis(self.scoring.timeout_ms),
            scoring_grace: Duration::from_millis(self.scoring.grace_ms),
        }
    }

    /// Loads the configured quiz catalog, or just the built-in sample quiz.
    pub fn load_catalog(&self) -> Result<QuizCatalog, CoreError> {
        match &self.quiz.catalog_path {
            Some(path) => QuizCatalog::load_from_file(path),
            None => Ok(QuizCatalog::new()),
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }
        if self.server.max_connections == 0 {
            return Err("server.max_connections must be greater than 0".to_string());
        }
        if self.server.security.max_message_size == 0 {
            return Err("server.security.max_message_size must be greater than 0".to_string());
        }

        let rooms = &self.rooms;
        if !(5..=600).contains(&rooms.round_duration_secs) {
            return Err("rooms.round_duration_secs must be between 5 and 600".to_string());
        }
        if rooms.max_players == 0 {
            return Err("rooms.max_players must be greater than 0".to_string());
        }
        if rooms.inbox_capacity == 0 {
            return Err("rooms.inbox_capacity must be greater than 0".to_string());
        }
        if rooms.reap_interval_secs == 0 {
            return Err("rooms.reap_interval_secs must be greater than 0".to_string());
        }
        if rooms.default_categories.iter().all(|c| c.trim().is_empty()) {
            return Err("rooms.default_categories must name at least one category".to_string());
        }
        if let Some(c) = rooms.excluded_letters.chars().find(|c| !c.is_ascii_alphabetic()) {
            return Err(format!("rooms.excluded_letters may only contain letters, found {c:?}"));
        }
        let excluded = self.to_room_settings().excluded_letters;
        let available = ('A'..='Z').filter(|c| !excluded.contains(c)).count();
        if rooms.word_rounds == 0 || rooms.word_rounds > available {
            return Err(format!(
                "rooms.word_rounds must be between 1 and {available} (letters available)"
            ));
        }

        if self.scoring.timeout_ms == 0 {
            return Err("scoring.timeout_ms must be greater than 0".to_string());
        }
        if self.scoring.backend == ScoringBackend::Http {
            match self.scoring.endpoint.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => return Err(format!("Invalid scoring endpoint: {url}")),
                None => return Err("scoring.endpoint is required for the http backend".to_string()),
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.connection_timeout, 300);
        assert_eq!(config.rooms.excluded_letters, "QXY");
        assert_eq!(config.scoring.backend, ScoringBackend::Local);
        assert!(config.quiz.catalog_path.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
    }

    #[test]
    fn test_conversions() {
        let mut config = AppConfig::default();
        config.rooms.round_duration_secs = 45;
        config.rooms.excluded_letters = "qz".to_string();
        config.scoring.timeout_ms = 1500;

        let settings = config.to_room_settings();
        assert_eq!(settings.round_duration, Duration::from_secs(45));
        assert_eq!(settings.excluded_letters, vec!['Q', 'Z']);
        assert_eq!(settings.scoring_timeout, Duration::from_millis(1500));
        assert!(settings.word_anyone_can_start);
        assert!(!settings.quiz_anyone_can_start);

        let server = config.to_server_config().unwrap();
        assert_eq!(server.bind_address.port(), 8080);
        assert_eq!(server.security.max_connections_per_ip, 10);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml = r#"
            [server]
            bind_address = "0.0.0.0:9100"

            [server.security]
            max_requests_per_minute = 30

            [rooms]
            max_players = 4

            [scoring]
            backend = "http"
            endpoint = "http://localhost:7000/score"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.security.max_requests_per_minute, 30);
        assert_eq!(config.server.security.max_message_size, 16 * 1024);
        assert_eq!(config.rooms.max_players, 4);
        assert_eq!(config.rooms.word_rounds, 5);
        assert_eq!(config.scoring.backend, ScoringBackend::Http);
        assert_eq!(config.scoring.grace_ms, 2000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rooms.round_duration_secs = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rooms.excluded_letters = "AB1".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rooms.excluded_letters = "ABCDEFGHIJKLMNOPQRSTUVW".to_string();
        config.rooms.word_rounds = 5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scoring.backend = ScoringBackend::Http;
        assert!(config.validate().is_err());
        config.scoring.endpoint = Some("ftp://nope".to_string());
        assert!(config.validate().is_err());
        config.scoring.endpoint = Some("https://validator.example/score".to_string());
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(!path.exists());

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");

        // The written file loads back to the same settings
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.rooms.default_categories, config.rooms.default_categories);
        assert_eq!(reloaded.scoring.backend, ScoringBackend::Local);
    }

    #[tokio::test]
    async fn test_load_rejects_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[server\nbind_address = ").unwrap();
        assert!(AppConfig::load_from_file(file.path()).await.is_err());
    }

    #[test]
    fn test_load_catalog() {
        let config = AppConfig::default();
        let catalog = config.load_catalog().unwrap();
        assert_eq!(catalog.len(), 1);

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rivers": {{"title": "Rivers", "questions": [
                {{"text": "Longest river?", "options": ["Nile", "Rhine"], "correct": 0}}
            ]}}}}"#
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.quiz.catalog_path = Some(file.path().display().to_string());
        let catalog = config.load_catalog().unwrap();
        assert!(catalog.get("rivers").is_some());

        config.quiz.catalog_path = Some("/definitely/not/here.json".to_string());
        assert!(matches!(config.load_catalog(), Err(CoreError::CatalogIo(_))));
    }
}
