//! Main entry point for the lineup matchmaking service
//!
//! Loads configuration, starts the matching engine with its request API and
//! health endpoints, and shuts everything down on SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use lineup::config::AppConfig;
use lineup::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Lineup Matchmaking Service - skill-based team matchmaking for player groups
#[derive(Parser)]
#[command(
    name = "lineup",
    version,
    about = "A skill-based team matchmaking service for pre-formed player groups",
    long_about = "Lineup accepts search requests for groups of players, assembles teams of \
                 groups with close ratings, optionally waits for every player to confirm, \
                 and requests a game server for each finished match."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override request API port")]
    http_port: Option<u16>,

    /// Metrics port override
    #[arg(long, value_name = "PORT", help = "Override metrics server port")]
    metrics_port: Option<u16>,

    /// Enable readiness checks
    #[arg(long, help = "Require every player to confirm a match before allocation")]
    check_readiness: bool,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = Arc::new(AppState::new(config).await?);
    app_state.start().await?;

    let health = HealthCheck::check(app_state.clone()).await;
    if let Err(e) = app_state.shutdown().await {
        warn!("Health check shutdown failed: {}", e);
    }

    match health {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            println!("  Groups Searching: {}", health.stats.groups_searching);
            println!("  Players Searching: {}", health.stats.players_searching);
            println!("  Matches Started: {}", health.stats.matches_started);
            println!("  Uptime: {}", health.stats.uptime_info);

            if health.status == HealthStatus::Healthy {
                std::process::exit(0);
            } else {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to install Ctrl+C handler")?;
                info!("Received SIGINT (Ctrl+C) signal");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM signal");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}

/// Log a health summary every 30 seconds
async fn health_check_task(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while app_state.is_running().await {
        interval.tick().await;

        match HealthCheck::check(app_state.clone()).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} groups searching, {} matches in progress",
                    health.status, health.stats.groups_searching, health.stats.matches_in_progress
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    let matchmaker = &config.matchmaker;
    info!("🚀 Lineup Matchmaking Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Request API port: {}", config.service.http_port);
    info!("   Metrics port: {}", config.service.metrics_port);
    info!(
        "   Match format: {} teams of {}",
        matchmaker.team_count, matchmaker.team_size
    );
    info!(
        "   Rating search radius: {}",
        matchmaker.max_rating_spread_to_search
    );
    if matchmaker.check_readiness {
        info!(
            "   Readiness window: {}s (penalty: {})",
            matchmaker.seconds_to_accept_match, matchmaker.penalty_for_unaccepted_match
        );
    } else {
        info!("   Readiness checks: disabled");
    }
    info!(
        "   Allocator: {:?} ({}, retry backoff {}ms)",
        config.allocator.mode,
        config.allocator.server_manager_addr,
        config.allocator.retry_backoff_ms
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    if let Some(metrics_port) = args.metrics_port {
        config.service.metrics_port = metrics_port;
    }

    if args.check_readiness {
        config.matchmaker.check_readiness = true;
    }

    lineup::config::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration (CLI args can override environment/config file)
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = tokio::spawn(health_check_task(app_state.clone()));

    info!("✅ Lineup Matchmaking Service is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    if let Err(e) = wait_for_shutdown_signal().await {
        error!("Signal handling failed: {}", e);
    }

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    // The engine wait inside shutdown is bounded too; this caps the whole sequence
    let shutdown_timeout = config.shutdown_timeout() + Duration::from_secs(1);
    match tokio::time::timeout(shutdown_timeout, app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => error!("Shutdown failed: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 Lineup Matchmaking Service stopped");
    Ok(())
}
