//! Utility functions for the matchmaking service

use crate::types::{MatchId, Rating};
use uuid::Uuid;

/// Generate a new unique match ID
pub fn generate_match_id() -> MatchId {
    Uuid::new_v4()
}

/// Difference between the highest and lowest rating, 0 for an empty slice
pub fn rating_spread(ratings: &[Rating]) -> i64 {
    match (ratings.iter().min(), ratings.iter().max()) {
        (Some(min), Some(max)) => max - min,
        _ => 0,
    }
}

/// Integer average of ratings, truncating toward zero
pub fn average_rating(sum: Rating, count: usize) -> Rating {
    if count == 0 {
        return 0;
    }
    sum / count as Rating
}
