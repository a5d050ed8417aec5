//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the matching
//! engine to its collaborators and runs the request API, the health server
//! and background tasks.

use crate::api::{ApiServer, ApiServerConfig};
use crate::config::{AllocatorMode, AppConfig};
use crate::matchmaker::{
    EngineSettings, HttpServerAllocator, InMemoryPlayerDirectory, LocalServerAllocator,
    MatchingEngine, MatchmakerHandle, PlayerDirectory, ServerAllocator,
};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, HealthStatus};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Front door to the matching engine
    matchmaker: MatchmakerHandle,

    /// Task running the matching engine
    engine_task: Mutex<Option<JoinHandle<()>>>,

    /// Metrics shared by every component
    metrics_collector: Arc<MetricsCollector>,

    /// Search request endpoints
    api_server: Arc<ApiServer>,

    /// Health and metrics endpoints, created on start
    metrics_service: RwLock<Option<MetricsService>>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: std::time::Instant,
}

impl AppState {
    /// Initialize the application with the in-process directory and the
    /// configured allocator
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        let directory = InMemoryPlayerDirectory::from_settings(&config.directory).map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to load player directory: {}", e),
            }
        })?;
        info!(
            "Player directory ready: {} known players, default rating {:?}",
            directory.len(),
            config.directory.default_rating
        );

        let allocator: Arc<dyn ServerAllocator> = match config.allocator.mode {
            AllocatorMode::Http => Arc::new(
                HttpServerAllocator::new(config.allocator_timeout()).map_err(|e| {
                    ServiceError::Initialization {
                        message: format!("Failed to create server allocator: {}", e),
                    }
                })?,
            ),
            AllocatorMode::Local => {
                warn!("Using the local allocator: server IDs are minted in-process");
                Arc::new(LocalServerAllocator::new())
            }
        };

        Self::with_collaborators(config, Arc::new(directory), allocator)
    }

    /// Initialize the application around the given directory and allocator
    pub fn with_collaborators(
        config: AppConfig,
        directory: Arc<dyn PlayerDirectory>,
        allocator: Arc<dyn ServerAllocator>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing lineup matchmaking service");
        info!(
            "Configuration: service={}, allocator={:?} at {}",
            config.service.name, config.allocator.mode, config.allocator.server_manager_addr
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (matchmaker, engine_task) = MatchingEngine::spawn(
            EngineSettings::from_config(&config),
            directory,
            allocator,
            metrics_collector.clone(),
        )
        .map_err(|e| ServiceError::Configuration {
            message: format!("Invalid matchmaker settings: {}", e),
        })?;

        let api_server = Arc::new(ApiServer::new(
            ApiServerConfig {
                port: config.service.http_port,
                host: "0.0.0.0".to_string(),
            },
            matchmaker.clone(),
        ));

        Ok(Self {
            config,
            matchmaker,
            engine_task: Mutex::new(Some(engine_task)),
            metrics_collector,
            api_server,
            metrics_service: RwLock::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: std::time::Instant::now(),
        })
    }

    /// Start the request API, health endpoints and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting lineup matchmaking service");

        if !self.matchmaker.is_running() {
            return Err(ServiceError::Initialization {
                message: "Matching engine is not running".to_string(),
            });
        }

        // Mark as running
        *self.is_running.write().await = true;

        // Start metrics service first
        self.start_metrics_service().await?;

        self.start_api_server().await;

        self.start_background_tasks().await;

        info!("✅ Lineup matchmaking service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of lineup service");

        // Mark as not running
        *self.is_running.write().await = false;

        // Stop taking new searches
        if let Err(e) = self.api_server.stop().await {
            warn!("Failed to stop request API: {}", e);
        }

        // Cancel searching groups and stop the engine
        let final_stats = self.matchmaker.stats().await.ok();
        if let Err(e) = self.matchmaker.shutdown().await {
            warn!("Matching engine already stopped: {}", e);
        }
        if let Some(task) = self.engine_task.lock().await.take() {
            match tokio::time::timeout(self.config.shutdown_timeout(), task).await {
                Ok(Ok(())) => info!("✅ Matching engine stopped"),
                Ok(Err(e)) => {
                    return Err(ServiceError::BackgroundTask {
                        message: format!("Matching engine task failed: {}", e),
                    })
                }
                Err(_) => warn!("Matching engine did not stop within the shutdown timeout"),
            }
        }

        self.stop_background_tasks().await;

        // Stop metrics service
        if let Some(metrics_service) = self.metrics_service.write().await.take() {
            info!("Stopping metrics service...");
            if let Err(e) = metrics_service.stop().await {
                warn!("Failed to stop metrics service: {}", e);
            } else {
                info!("✅ Metrics service stopped");
            }
        }

        if let Some(stats) = final_stats {
            info!("Final engine statistics: {:?}", stats);
        }
        info!("✅ Lineup service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await && self.matchmaker.is_running()
    }

    /// Get the matchmaker handle
    pub fn matchmaker(&self) -> &MatchmakerHandle {
        &self.matchmaker
    }

    /// Get the metrics collector
    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Start health and metrics endpoints
    async fn start_metrics_service(self: &Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.metrics_port;
        info!("Starting metrics and health endpoints on port {}", port);

        let health_config = HealthServerConfig {
            port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );
        let metrics_service = MetricsService::new(self.metrics_collector.clone(), health_server);

        let service = metrics_service.clone();
        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        *self.metrics_service.write().await = Some(metrics_service);
        self.background_tasks.lock().await.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    async fn start_api_server(&self) {
        let api_server = self.api_server.clone();
        let port = self.config.service.http_port;

        let api_handle = tokio::spawn(async move {
            if let Err(e) = api_server.start().await {
                error!("Request API failed: {}", e);
            }
        });
        self.background_tasks.lock().await.push(api_handle);

        info!("✅ Request API started on port {}", port);
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(self: &Arc<Self>) {
        info!("Starting health metrics task (15s interval)...");

        let app_state = self.clone();
        let health_metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(15));
            info!("Health metrics task started");

            while app_state.is_running().await {
                interval.tick().await;

                let collector = &app_state.metrics_collector;
                collector
                    .service()
                    .uptime_seconds
                    .set(app_state.uptime().as_secs() as i64);

                let (engine_check, _) = HealthCheck::check_matching_engine(&app_state).await;
                let engine_healthy = engine_check.status == HealthStatus::Healthy;
                collector.update_component_health("matching_engine", engine_healthy);
                collector.update_health_status(match engine_check.status {
                    HealthStatus::Healthy => 2,
                    HealthStatus::Degraded => 1,
                    HealthStatus::Unhealthy => 0,
                });

                debug!(
                    "Updated service health metrics - uptime: {}s, engine: {}",
                    app_state.uptime().as_secs(),
                    engine_check.status
                );
            }

            info!("Health metrics task stopped");
        });

        self.background_tasks.lock().await.push(health_metrics_task);
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            debug!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
