//! Matchmaker tuning knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings that shape team assembly, readiness and penalties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakerSettings {
    /// Players per team
    pub team_size: usize,
    /// Teams per match
    pub team_count: usize,
    /// Number of rating offsets searched around the anchor (0 ..= n - 1)
    pub max_rating_spread_to_search: u32,
    /// Highest allowed rating difference inside one group, negative disables the check
    pub max_rating_spread_in_group: i64,
    /// Require every player to confirm before a server is requested
    pub check_readiness: bool,
    /// Readiness window in seconds
    pub seconds_to_accept_match: u64,
    /// Ban players who let a readiness window lapse
    pub penalty_for_unaccepted_match: bool,
    /// Ban duration in seconds
    pub penalty_seconds: u64,
    /// Return groups to search when the allocator fails, instead of cancelling them
    pub requeue_on_allocation_failure: bool,
}

impl Default for MatchmakerSettings {
    fn default() -> Self {
        Self {
            team_size: 5,
            team_count: 2,
            max_rating_spread_to_search: 100,
            max_rating_spread_in_group: -1,
            check_readiness: false,
            seconds_to_accept_match: 10,
            penalty_for_unaccepted_match: false,
            penalty_seconds: 60,
            requeue_on_allocation_failure: true,
        }
    }
}

impl MatchmakerSettings {
    /// Readiness window as Duration
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_secs(self.seconds_to_accept_match)
    }

    /// Penalty window as Duration
    pub fn penalty_duration(&self) -> Duration {
        Duration::from_secs(self.penalty_seconds)
    }

    /// Intra-group spread cap, `None` when disabled
    pub fn group_spread_cap(&self) -> Option<i64> {
        (self.max_rating_spread_in_group >= 0).then_some(self.max_rating_spread_in_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread_cap() {
        let mut settings = MatchmakerSettings::default();
        assert_eq!(settings.group_spread_cap(), None);

        settings.max_rating_spread_in_group = 0;
        assert_eq!(settings.group_spread_cap(), Some(0));

        settings.max_rating_spread_in_group = 100;
        assert_eq!(settings.group_spread_cap(), Some(100));
    }

    #[test]
    fn test_durations() {
        let settings = MatchmakerSettings {
            seconds_to_accept_match: 5,
            penalty_seconds: 60,
            ..Default::default()
        };
        assert_eq!(settings.accept_timeout(), Duration::from_secs(5));
        assert_eq!(settings.penalty_duration(), Duration::from_secs(60));
    }
}
