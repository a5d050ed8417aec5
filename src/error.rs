//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

use crate::types::{GroupId, PlayerId};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Player directory lookup failed: {reason}")]
    DirectoryLookupFailed { reason: String },

    #[error("Rating spread {spread} in group {group_id} exceeds the allowed {max}")]
    RatingSpreadExceeded {
        group_id: GroupId,
        spread: i64,
        max: i64,
    },

    #[error("Player {player_id} is penalized for another {remaining_seconds}s")]
    PlayerPenalized {
        player_id: PlayerId,
        remaining_seconds: u64,
    },

    #[error("Server allocator unavailable: {reason}")]
    AllocatorUnavailable { reason: String },

    #[error("Invalid group: {reason}")]
    InvalidGroup { reason: String },

    #[error("Group {group_id} has {size} players but teams hold {team_size}")]
    GroupTooLarge {
        group_id: GroupId,
        size: usize,
        team_size: usize,
    },

    #[error("Group {group_id} is already searching")]
    DuplicateGroup { group_id: GroupId },

    #[error("Matching engine is not running")]
    EngineUnavailable,

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Short machine-readable label, used for metric labels and API bodies
    pub fn kind(&self) -> &'static str {
        match self {
            MatchmakingError::DirectoryLookupFailed { .. } => "directory_lookup_failed",
            MatchmakingError::RatingSpreadExceeded { .. } => "rating_spread_exceeded",
            MatchmakingError::PlayerPenalized { .. } => "player_penalized",
            MatchmakingError::AllocatorUnavailable { .. } => "allocator_unavailable",
            MatchmakingError::InvalidGroup { .. } => "invalid_group",
            MatchmakingError::GroupTooLarge { .. } => "group_too_large",
            MatchmakingError::DuplicateGroup { .. } => "duplicate_group",
            MatchmakingError::EngineUnavailable => "engine_unavailable",
            MatchmakingError::ConfigurationError { .. } => "configuration_error",
            MatchmakingError::InternalError { .. } => "internal_error",
        }
    }
}
