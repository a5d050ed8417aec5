//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the lineup
//! matchmaking service, including readiness and liveness checks.

use crate::matchmaker::EngineStats;
use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long the engine may take to answer a stats request before it is
/// considered unresponsive
const ENGINE_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub groups_searching: usize,
    pub players_searching: usize,
    pub players_awaiting_readiness: usize,
    pub penalized_players: usize,
    pub matches_in_progress: usize,
    pub matches_started: u64,
    pub matches_completed: u64,
    pub groups_cancelled: u64,
    /// Service uptime information
    pub uptime_info: String,
}

impl ServiceStats {
    fn from_engine(stats: EngineStats, uptime_info: String) -> Self {
        Self {
            groups_searching: stats.groups_searching,
            players_searching: stats.players_searching,
            players_awaiting_readiness: stats.players_awaiting_readiness,
            penalized_players: stats.penalized_players,
            matches_in_progress: stats.matches_in_progress,
            matches_started: stats.matches_started,
            matches_completed: stats.matches_completed,
            groups_cancelled: stats.groups_cancelled,
            uptime_info,
        }
    }
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        // Check if service is running
        let service_check = Self::check_service_running(&app_state).await;
        if service_check.status != HealthStatus::Healthy {
            overall_status = HealthStatus::Unhealthy;
        }
        checks.push(service_check);

        // Check the matching engine answers requests
        let (engine_check, engine_stats) = Self::check_matching_engine(&app_state).await;
        if engine_check.status == HealthStatus::Unhealthy {
            overall_status = HealthStatus::Unhealthy;
        } else if engine_check.status == HealthStatus::Degraded
            && overall_status == HealthStatus::Healthy
        {
            overall_status = HealthStatus::Degraded;
        }
        checks.push(engine_check);

        let uptime_info = format!("Up for {}s", app_state.uptime().as_secs());
        let stats = match engine_stats {
            Some(stats) => ServiceStats::from_engine(stats, uptime_info),
            None => ServiceStats {
                uptime_info,
                ..Default::default()
            },
        };

        Ok(HealthCheck {
            status: overall_status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_matching_engine(&app_state).await.0.status)
    }

    /// Check if service is running
    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Ask the engine for a stats snapshot within a short timeout
    pub async fn check_matching_engine(
        app_state: &AppState,
    ) -> (ComponentCheck, Option<EngineStats>) {
        let start = std::time::Instant::now();

        let response =
            tokio::time::timeout(ENGINE_CHECK_TIMEOUT, app_state.matchmaker().stats()).await;
        let (status, message, stats) = match response {
            Ok(Ok(stats)) => (HealthStatus::Healthy, None, Some(stats)),
            Ok(Err(e)) => {
                debug!("Matching engine stats failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Engine unavailable: {}", e)),
                    None,
                )
            }
            Err(_) => (
                HealthStatus::Degraded,
                Some("Engine slow to respond".to_string()),
                None,
            ),
        };

        let check = ComponentCheck {
            name: "matching_engine".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        (check, stats)
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
