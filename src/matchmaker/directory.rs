//! Player rating lookup
//!
//! The engine never stores ratings between searches; every admission asks a
//! [`PlayerDirectory`] for the current values.

use crate::config::DirectorySettings;
use crate::error::{MatchmakingError, Result};
use crate::types::{PlayerId, PlayerRecord, Rating};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Source of player ratings
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
    /// Resolve ratings for `ids`, in request order. The call should give up
    /// by `deadline`; callers enforce it regardless. A player the directory
    /// does not know is an error.
    async fn resolve(&self, ids: &[PlayerId], deadline: Instant) -> Result<Vec<PlayerRecord>>;
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    players: Vec<PlayerRecord>,
}

/// Directory held in process memory
#[derive(Debug, Default)]
pub struct InMemoryPlayerDirectory {
    ratings: RwLock<HashMap<PlayerId, Rating>>,
    /// Rating handed out for unknown players instead of failing
    default_rating: Option<Rating>,
}

impl InMemoryPlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_rating(default_rating: Rating) -> Self {
        Self {
            ratings: RwLock::new(HashMap::new()),
            default_rating: Some(default_rating),
        }
    }

    /// Build a directory pre-populated with the given records
    pub fn with_players(records: impl IntoIterator<Item = PlayerRecord>) -> Self {
        let ratings = records.into_iter().map(|r| (r.id, r.rating)).collect();
        Self {
            ratings: RwLock::new(ratings),
            default_rating: None,
        }
    }

    /// Build from configuration, loading the seed file if one is set
    pub fn from_settings(settings: &DirectorySettings) -> Result<Self> {
        let mut directory = match &settings.seed_file {
            Some(path) => Self::from_seed_file(path)?,
            None => Self::new(),
        };
        directory.default_rating = settings.default_rating;
        Ok(directory)
    }

    /// Load `[[players]]` entries (`id`, `rating`) from a TOML file
    pub fn from_seed_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read player seed file {}", path.display()))?;
        let seed: SeedFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse player seed file {}", path.display()))?;

        info!(
            "Loaded {} players from seed file {}",
            seed.players.len(),
            path.display()
        );
        Ok(Self::with_players(seed.players))
    }

    /// Add or update a player's rating
    pub fn upsert(&self, id: PlayerId, rating: Rating) -> Result<()> {
        let mut ratings = self
            .ratings
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire ratings write lock".to_string(),
            })?;
        ratings.insert(id, rating);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ratings.read().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PlayerDirectory for InMemoryPlayerDirectory {
    async fn resolve(&self, ids: &[PlayerId], _deadline: Instant) -> Result<Vec<PlayerRecord>> {
        let ratings = self
            .ratings
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire ratings read lock".to_string(),
            })?;

        let records = ids
            .iter()
            .map(|&id| {
                ratings
                    .get(&id)
                    .copied()
                    .or(self.default_rating)
                    .map(|rating| PlayerRecord::new(id, rating))
                    .ok_or_else(|| MatchmakingError::DirectoryLookupFailed {
                        reason: format!("Unknown player {}", id),
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!("Resolved ratings for {} players", records.len());
        Ok(records)
    }
}
