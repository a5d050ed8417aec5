//! Main application configuration
//!
//! This module defines the primary configuration structures for the lineup
//! matchmaking service, including file/environment loading and validation.

use crate::config::matchmaker::MatchmakerSettings;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaker: MatchmakerSettings,
    pub directory: DirectorySettings,
    pub allocator: AllocatorSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the search request API
    pub http_port: u16,
    /// Port for health and metrics endpoints
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Player directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Upper bound for one rating lookup in milliseconds
    pub request_timeout_ms: u64,
    /// Rating assigned to players the directory does not know
    pub default_rating: Option<i64>,
    /// TOML file with `[[players]]` entries to preload
    pub seed_file: Option<PathBuf>,
}

/// How the service obtains game servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorMode {
    /// POST each match to the server manager
    Http,
    /// Mint server IDs in-process, for local runs without a server manager
    Local,
}

impl std::str::FromStr for AllocatorMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "http" => Ok(AllocatorMode::Http),
            "local" => Ok(AllocatorMode::Local),
            other => Err(anyhow!("Unknown allocator mode: {}", other)),
        }
    }
}

/// Server allocator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorSettings {
    pub mode: AllocatorMode,
    /// Server manager endpoint every match is posted to
    pub server_manager_addr: String,
    /// Fixed timeout of one allocation request in seconds
    pub request_timeout_seconds: u64,
    /// Assembly pause after a failed allocation in milliseconds
    pub retry_backoff_ms: u64,
    /// Upper bound for the doubled pause in milliseconds
    pub max_retry_backoff_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "lineup".to_string(),
            log_level: "info".to_string(),
            http_port: 8080,
            metrics_port: 9090,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2000,
            default_rating: None,
            seed_file: None,
        }
    }
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            mode: AllocatorMode::Http,
            server_manager_addr: "http://localhost:7000/servers".to_string(),
            request_timeout_seconds: 10,
            retry_backoff_ms: 500,
            max_retry_backoff_ms: 30000,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", key, value)),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still override
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Some(port) = parse_env("HTTP_PORT")? {
            self.service.http_port = port;
        }
        if let Some(port) = parse_env("METRICS_PORT")? {
            self.service.metrics_port = port;
        }
        if let Some(timeout) = parse_env("SHUTDOWN_TIMEOUT_SECONDS")? {
            self.service.shutdown_timeout_seconds = timeout;
        }

        // Matchmaker settings
        if let Some(size) = parse_env("TEAM_SIZE")? {
            self.matchmaker.team_size = size;
        }
        if let Some(count) = parse_env("TEAM_COUNT")? {
            self.matchmaker.team_count = count;
        }
        if let Some(radius) = parse_env("MAX_RATING_SPREAD_TO_SEARCH")? {
            self.matchmaker.max_rating_spread_to_search = radius;
        }
        if let Some(spread) = parse_env("MAX_RATING_SPREAD_IN_GROUP")? {
            self.matchmaker.max_rating_spread_in_group = spread;
        }
        if let Some(check) = parse_env("CHECK_READINESS")? {
            self.matchmaker.check_readiness = check;
        }
        if let Some(seconds) = parse_env("SECONDS_TO_ACCEPT_MATCH")? {
            self.matchmaker.seconds_to_accept_match = seconds;
        }
        if let Some(penalize) = parse_env("PENALTY_FOR_UNACCEPTED_MATCH")? {
            self.matchmaker.penalty_for_unaccepted_match = penalize;
        }
        if let Some(seconds) = parse_env("PENALTY_SECONDS")? {
            self.matchmaker.penalty_seconds = seconds;
        }
        if let Some(requeue) = parse_env("REQUEUE_ON_ALLOCATION_FAILURE")? {
            self.matchmaker.requeue_on_allocation_failure = requeue;
        }

        // Directory settings
        if let Some(timeout) = parse_env("DIRECTORY_TIMEOUT_MS")? {
            self.directory.request_timeout_ms = timeout;
        }
        if let Some(rating) = parse_env("DEFAULT_RATING")? {
            self.directory.default_rating = Some(rating);
        }
        if let Ok(path) = env::var("PLAYER_SEED_FILE") {
            self.directory.seed_file = Some(PathBuf::from(path));
        }

        // Allocator settings
        if let Some(mode) = parse_env("ALLOCATOR_MODE")? {
            self.allocator.mode = mode;
        }
        if let Ok(addr) = env::var("SERVER_MANAGER_ADDR") {
            self.allocator.server_manager_addr = addr;
        }
        if let Some(timeout) = parse_env("ALLOCATOR_TIMEOUT_SECONDS")? {
            self.allocator.request_timeout_seconds = timeout;
        }
        if let Some(backoff) = parse_env("ALLOCATOR_RETRY_BACKOFF_MS")? {
            self.allocator.retry_backoff_ms = backoff;
        }
        if let Some(backoff) = parse_env("ALLOCATOR_MAX_RETRY_BACKOFF_MS")? {
            self.allocator.max_retry_backoff_ms = backoff;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get directory lookup timeout as Duration
    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory.request_timeout_ms)
    }

    /// Get allocator request timeout as Duration
    pub fn allocator_timeout(&self) -> Duration {
        Duration::from_secs(self.allocator.request_timeout_seconds)
    }

    pub fn allocation_backoff(&self) -> Duration {
        Duration::from_millis(self.allocator.retry_backoff_ms)
    }

    pub fn max_allocation_backoff(&self) -> Duration {
        Duration::from_millis(self.allocator.max_retry_backoff_ms)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.service.metrics_port == 0 {
        return Err(anyhow!("Metrics port cannot be 0"));
    }
    if config.service.http_port == config.service.metrics_port {
        return Err(anyhow!("HTTP and metrics ports must differ"));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.directory.request_timeout_ms == 0 {
        return Err(anyhow!("Directory timeout must be greater than 0"));
    }
    if config.allocator.request_timeout_seconds == 0 {
        return Err(anyhow!("Allocator timeout must be greater than 0"));
    }

    // Validate matchmaker settings
    let matchmaker = &config.matchmaker;
    if matchmaker.team_size == 0 {
        return Err(anyhow!("Team size must be greater than 0"));
    }
    if matchmaker.team_count == 0 {
        return Err(anyhow!("Team count must be greater than 0"));
    }
    if matchmaker.max_rating_spread_to_search == 0 {
        return Err(anyhow!("Rating search radius must be greater than 0"));
    }
    if matchmaker.check_readiness && matchmaker.seconds_to_accept_match == 0 {
        return Err(anyhow!(
            "Readiness window must be greater than 0 when readiness checks are enabled"
        ));
    }

    // Validate allocator settings
    if config.allocator.mode == AllocatorMode::Http
        && config.allocator.server_manager_addr.is_empty()
    {
        return Err(anyhow!("Server manager address cannot be empty"));
    }
    if config.allocator.retry_backoff_ms == 0 {
        return Err(anyhow!("Allocator retry backoff must be greater than 0"));
    }
    if config.allocator.max_retry_backoff_ms < config.allocator.retry_backoff_ms {
        return Err(anyhow!(
            "Maximum allocator retry backoff cannot be below the initial backoff"
        ));
    }

    Ok(())
}
