//! Common types used throughout the matchmaking service

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = u64;

/// Caller-supplied identifier for a search group
pub type GroupId = String;

/// Skill rating as supplied by the player directory
pub type Rating = i64;

/// Opaque identifier of an allocated game server
pub type ServerId = String;

/// Unique identifier for an assembled match
pub type MatchId = Uuid;

/// Rating data returned by the player directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub rating: Rating,
}

impl PlayerRecord {
    pub fn new(id: PlayerId, rating: Rating) -> Self {
        Self { id, rating }
    }
}

/// Reason a search ended without a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller withdrew the group
    Removed,
    /// A player of the group did not confirm readiness in time
    NotReady,
    /// The server allocator failed and the group was released
    AllocationFailed,
    /// The engine shut down before the group was matched
    EngineStopped,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Removed => write!(f, "removed"),
            CancelReason::NotReady => write!(f, "not_ready"),
            CancelReason::AllocationFailed => write!(f, "allocation_failed"),
            CancelReason::EngineStopped => write!(f, "engine_stopped"),
        }
    }
}

/// Terminal outcome of a group's search. Exactly one is delivered per group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    MatchFound {
        server_id: ServerId,
        match_id: MatchId,
    },
    Cancelled {
        reason: CancelReason,
    },
}

impl SearchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, SearchOutcome::MatchFound { .. })
    }

    pub fn server_id(&self) -> Option<&str> {
        match self {
            SearchOutcome::MatchFound { server_id, .. } => Some(server_id),
            SearchOutcome::Cancelled { .. } => None,
        }
    }
}

/// Player IDs of one team, grouped as they searched. This is what the
/// server allocator receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRoster {
    pub groups: Vec<Vec<PlayerId>>,
}

impl TeamRoster {
    /// All player IDs of the team, in group order
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.groups.iter().flatten().copied().collect()
    }

    pub fn player_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}
