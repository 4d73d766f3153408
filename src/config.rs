//! Application configuration.
//!
//! Loaded from a TOML file (path from the CLI or `CHESS_ACADEMY_CONFIG`),
//! with every section and field falling back to a sensible default so the
//! server starts with no file at all.

use std::path::{Path, PathBuf};

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::retry::RetryPolicy;

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error with caller location tracking.
    #[track_caller]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file.
    #[serde(default = "default_db_path")]
    path: String,
}

fn default_db_path() -> String {
    "chess_academy.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// UCI engine settings.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine binary path or command name.
    #[serde(default = "default_engine_binary")]
    binary: String,
    /// Default skill level (0-20) for bot games.
    #[serde(default = "default_skill_level")]
    skill_level: i32,
    /// Default analysis depth.
    #[serde(default = "default_depth")]
    depth: u32,
    /// Search budget per bot move, in milliseconds.
    #[serde(default = "default_time_limit_ms")]
    time_limit_ms: u64,
}

fn default_engine_binary() -> String {
    "stockfish".to_string()
}

fn default_skill_level() -> i32 {
    10
}

fn default_depth() -> u32 {
    15
}

fn default_time_limit_ms() -> u64 {
    2_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            skill_level: default_skill_level(),
            depth: default_depth(),
            time_limit_ms: default_time_limit_ms(),
        }
    }
}

/// Background maintenance settings.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the scheduler runs at all.
    #[serde(default = "default_true")]
    enabled: bool,
    /// Run each task once at startup before its first interval elapses.
    #[serde(default = "default_false")]
    run_on_startup: bool,
    /// Seconds between runs of each task.
    #[serde(default = "default_interval_secs")]
    interval_secs: u64,
    /// In-progress games idle longer than this many hours are abandoned.
    #[serde(default = "default_stale_game_hours")]
    stale_game_hours: i64,
    /// Directory holding task lock files.
    #[serde(default = "default_lock_dir")]
    lock_dir: String,
    /// Lock files older than this many seconds are treated as stale.
    #[serde(default = "default_lock_stale_secs")]
    lock_stale_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_interval_secs() -> u64 {
    21_600
}

fn default_stale_game_hours() -> i64 {
    24
}

fn default_lock_dir() -> String {
    "./locks".to_string()
}

fn default_lock_stale_secs() -> u64 {
    3_600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            run_on_startup: default_false(),
            interval_secs: default_interval_secs(),
            stale_game_hours: default_stale_game_hours(),
            lock_dir: default_lock_dir(),
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

/// Alert delivery settings.
#[derive(Debug, Clone, Default, Getters, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Webhook URL for operator alerts. Absent = log only.
    #[serde(default)]
    webhook_url: Option<String>,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Getters, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database settings.
    #[serde(default)]
    database: DatabaseConfig,
    /// HTTP server settings.
    #[serde(default)]
    api: ApiConfig,
    /// UCI engine settings.
    #[serde(default)]
    engine: EngineConfig,
    /// Backoff schedule for external-dependency calls.
    #[serde(default)]
    retry: RetryPolicy,
    /// Background maintenance settings.
    #[serde(default)]
    scheduler: SchedulerConfig,
    /// Alert delivery settings.
    #[serde(default)]
    alerts: AlertConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// With no explicit path, `CHESS_ACADEMY_CONFIG` is consulted, then
    /// `chess_academy.toml` in the working directory. A missing file is not
    /// an error: defaults apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an existing file cannot be read or parsed.
    #[instrument(skip(path))]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidate = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var("CHESS_ACADEMY_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("chess_academy.toml")),
        };

        if !candidate.exists() {
            info!(path = %candidate.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&candidate).map_err(|e| {
            ConfigError::new(format!(
                "Failed to read config file '{}': {}",
                candidate.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ConfigError::new(format!(
                "Failed to parse config file '{}': {}",
                candidate.display(),
                e
            ))
        })?;

        info!(path = %candidate.display(), "Config loaded");
        Ok(config)
    }

    /// Applies command-line overrides on top of the loaded file.
    pub fn apply_cli_overrides(
        &mut self,
        db_path: Option<String>,
        host: Option<String>,
        port: Option<u16>,
    ) {
        if let Some(path) = db_path {
            self.database.path = path;
        }
        if let Some(host) = host {
            self.api.host = host;
        }
        if let Some(port) = port {
            self.api.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.database().path(), "chess_academy.db");
        assert_eq!(*config.api().port(), 8000);
        assert_eq!(config.engine().binary(), "stockfish");
        assert!(*config.scheduler().enabled());
        assert!(config.alerts().webhook_url().is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [api]
            port = 9100

            [engine]
            skill_level = 4
            "#,
        )
        .expect("parse");

        assert_eq!(*config.api().port(), 9100);
        assert_eq!(config.api().host(), "127.0.0.1");
        assert_eq!(*config.engine().skill_level(), 4);
        assert_eq!(config.database().path(), "chess_academy.db");
    }

    #[test]
    fn overrides_win() {
        let mut config = AppConfig::default();
        config.apply_cli_overrides(Some(":memory:".to_string()), None, Some(9000));
        assert_eq!(config.database().path(), ":memory:");
        assert_eq!(*config.api().port(), 9000);
        assert_eq!(config.api().host(), "127.0.0.1");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).expect("load");
        assert_eq!(config.database().path(), "chess_academy.db");
    }
}
