//! Search request endpoints
//!
//! HTTP front end for the matchmaker using Axum. `POST /search` holds the
//! request open until the group's search ends and answers with the outcome.

use crate::error::MatchmakingError;
use crate::matchmaker::MatchmakerHandle;
use crate::types::{GroupId, PlayerId};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Request API configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub id: GroupId,
    pub player_ids: Vec<PlayerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub id: GroupId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyRequest {
    pub player_id: PlayerId,
}

#[derive(Clone)]
pub struct ApiState {
    pub matchmaker: MatchmakerHandle,
}

/// HTTP server accepting search, cancel and ready requests
pub struct ApiServer {
    config: ApiServerConfig,
    state: ApiState,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, matchmaker: MatchmakerHandle) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state: ApiState { matchmaker },
            shutdown_tx,
        }
    }

    /// Serve until [`ApiServer::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid request API address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr).await?;

        info!("Request API listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Request API shutdown signal received");
            })
            .await?;

        info!("Request API stopped");
        Ok(())
    }

    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/search", post(search_handler))
            .route("/search/cancel", post(cancel_handler))
            .route("/ready", post(ready_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping request API...");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to request API: {}", e);
        }
        Ok(())
    }
}

/// Withdraws the group if the caller goes away before its search ends
struct AbandonGuard {
    matchmaker: MatchmakerHandle,
    group_id: Option<GroupId>,
}

impl AbandonGuard {
    fn disarm(&mut self) {
        self.group_id = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(group_id) = self.group_id.take() {
            let matchmaker = self.matchmaker.clone();
            debug!("Search request for {} abandoned, withdrawing group", group_id);
            tokio::spawn(async move {
                let _ = matchmaker.remove_group(&group_id).await;
            });
        }
    }
}

async fn search_handler(
    State(state): State<ApiState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    debug!(
        "Search request for group {} ({} players)",
        request.id,
        request.player_ids.len()
    );

    let ticket = match state
        .matchmaker
        .add_group(request.id.clone(), request.player_ids)
        .await
    {
        Ok(ticket) => ticket,
        Err(e) => return error_response(&e),
    };

    let mut guard = AbandonGuard {
        matchmaker: state.matchmaker.clone(),
        group_id: Some(request.id),
    };
    let outcome = ticket.outcome().await;
    guard.disarm();

    (StatusCode::OK, Json(outcome)).into_response()
}

async fn cancel_handler(
    State(state): State<ApiState>,
    Json(request): Json<CancelRequest>,
) -> Response {
    match state.matchmaker.remove_group(&request.id).await {
        Ok(removed) => (StatusCode::OK, Json(json!({ "removed": removed }))).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn ready_handler(
    State(state): State<ApiState>,
    Json(request): Json<ReadyRequest>,
) -> Response {
    match state.matchmaker.set_player_ready(request.player_id).await {
        Ok(confirmed) => (StatusCode::OK, Json(json!({ "confirmed": confirmed }))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// HTTP status for a failed request
pub fn status_for(error: &anyhow::Error) -> StatusCode {
    match error.downcast_ref::<MatchmakingError>() {
        Some(
            MatchmakingError::RatingSpreadExceeded { .. }
            | MatchmakingError::InvalidGroup { .. }
            | MatchmakingError::GroupTooLarge { .. },
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(MatchmakingError::DuplicateGroup { .. }) => StatusCode::CONFLICT,
        Some(MatchmakingError::PlayerPenalized { .. }) => StatusCode::FORBIDDEN,
        Some(MatchmakingError::DirectoryLookupFailed { .. }) => StatusCode::BAD_GATEWAY,
        Some(MatchmakingError::EngineUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &anyhow::Error) -> Response {
    let kind = error
        .downcast_ref::<MatchmakingError>()
        .map(MatchmakingError::kind)
        .unwrap_or("internal_error");

    (
        status_for(error),
        Json(json!({
            "error": kind,
            "message": error.to_string(),
        })),
    )
        .into_response()
}
