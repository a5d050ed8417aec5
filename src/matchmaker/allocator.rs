//! Game server allocation for finished matches

use crate::error::{MatchmakingError, Result};
use crate::types::{PlayerId, ServerId, TeamRoster};
use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Hands out a game server for an assembled match
#[async_trait]
pub trait ServerAllocator: Send + Sync {
    /// Request a server hosting `rosters`, routed to `destination`
    async fn allocate(&self, rosters: &[TeamRoster], destination: &str) -> Result<ServerId>;
}

/// Asks the server manager for a server over HTTP.
///
/// Each match is posted to the destination as a JSON array with one array of
/// player IDs per team. The response body is the server ID.
#[derive(Debug, Clone)]
pub struct HttpServerAllocator {
    client: reqwest::Client,
}

impl HttpServerAllocator {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build server manager client")?;
        Ok(Self { client })
    }
}

fn unavailable<E: ToString>(reason: E) -> anyhow::Error {
    MatchmakingError::AllocatorUnavailable {
        reason: reason.to_string(),
    }
    .into()
}

#[async_trait]
impl ServerAllocator for HttpServerAllocator {
    async fn allocate(&self, rosters: &[TeamRoster], destination: &str) -> Result<ServerId> {
        let teams: Vec<Vec<PlayerId>> = rosters.iter().map(TeamRoster::player_ids).collect();
        debug!("Requesting server from {} for {} teams", destination, teams.len());

        let response = self
            .client
            .post(destination)
            .json(&teams)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("server manager answered {}", status)));
        }

        let body = response.text().await.map_err(unavailable)?;
        let server_id = body.trim();
        if server_id.is_empty() {
            return Err(unavailable("server manager returned an empty server ID"));
        }

        info!("Server manager assigned {} ({} teams)", server_id, teams.len());
        Ok(server_id.to_string())
    }
}

/// Allocator that mints server IDs locally without calling out
#[derive(Debug, Default)]
pub struct LocalServerAllocator;

impl LocalServerAllocator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServerAllocator for LocalServerAllocator {
    async fn allocate(&self, rosters: &[TeamRoster], destination: &str) -> Result<ServerId> {
        let server_id = format!("server-{}", Uuid::new_v4());
        let players: usize = rosters.iter().map(TeamRoster::player_count).sum();
        info!(
            "Allocated {} for {} teams ({} players), destination {}",
            server_id,
            rosters.len(),
            players,
            destination
        );
        Ok(server_id)
    }
}
