//! Temporary bans for players who let a readiness window lapse

use crate::error::MatchmakingError;
use crate::types::PlayerId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct PenaltyLedger {
    duration: Duration,
    entries: HashMap<PlayerId, Instant>,
}

impl PenaltyLedger {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            entries: HashMap::new(),
        }
    }

    /// Reject the group if any player is still serving a penalty.
    /// Entries found expired along the way are forgotten.
    pub fn check(&mut self, players: &[PlayerId], now: Instant) -> Result<(), MatchmakingError> {
        for &player_id in players {
            if let Some(remaining) = self.remaining(player_id, now) {
                return Err(MatchmakingError::PlayerPenalized {
                    player_id,
                    remaining_seconds: remaining.as_secs().max(1),
                });
            }
            self.entries.remove(&player_id);
        }
        Ok(())
    }

    /// Start (or restart) the penalty window for each player
    pub fn record(&mut self, players: &[PlayerId], now: Instant) {
        for &player_id in players {
            self.entries.insert(player_id, now);
        }
    }

    /// Time left on a player's penalty, `None` if they are free to search
    pub fn remaining(&self, player_id: PlayerId, now: Instant) -> Option<Duration> {
        let recorded = self.entries.get(&player_id)?;
        let elapsed = now.saturating_duration_since(*recorded);
        (elapsed < self.duration).then(|| self.duration - elapsed)
    }

    /// Forget every penalty that has run out by `now`
    pub fn prune(&mut self, now: Instant) {
        let duration = self.duration;
        self.entries
            .retain(|_, recorded| now.saturating_duration_since(*recorded) < duration);
    }

    /// Players in the ledger. Call [`prune`](Self::prune) first for an
    /// exact count of active penalties.
    pub fn penalized_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalty_window() {
        let start = Instant::now();
        let mut ledger = PenaltyLedger::new(Duration::from_secs(60));
        ledger.record(&[7], start);

        let err = ledger
            .check(&[1, 7], start + Duration::from_secs(30))
            .unwrap_err();
        assert_eq!(
            err,
            MatchmakingError::PlayerPenalized {
                player_id: 7,
                remaining_seconds: 30
            }
        );

        assert!(ledger.check(&[7], start + Duration::from_secs(61)).is_ok());
        // Expired entry is removed on check
        assert_eq!(ledger.penalized_count(), 0);
    }

    #[test]
    fn test_unpenalized_players_pass() {
        let mut ledger = PenaltyLedger::new(Duration::from_secs(60));
        assert!(ledger.check(&[1, 2, 3], Instant::now()).is_ok());
        assert_eq!(ledger.remaining(1, Instant::now()), None);
    }

    #[test]
    fn test_record_overwrites() {
        let start = Instant::now();
        let mut ledger = PenaltyLedger::new(Duration::from_secs(60));
        ledger.record(&[5], start);
        ledger.record(&[5], start + Duration::from_secs(50));

        assert_eq!(ledger.penalized_count(), 1);
        assert_eq!(
            ledger.remaining(5, start + Duration::from_secs(70)),
            Some(Duration::from_secs(40))
        );
    }

    #[test]
    fn test_prune_drops_expired_entries() {
        let start = Instant::now();
        let mut ledger = PenaltyLedger::new(Duration::from_secs(60));
        ledger.record(&[1, 2], start);
        ledger.record(&[3], start + Duration::from_secs(30));

        ledger.prune(start + Duration::from_secs(60));
        assert_eq!(ledger.penalized_count(), 1);
        assert!(ledger.remaining(3, start + Duration::from_secs(60)).is_some());

        ledger.prune(start + Duration::from_secs(90));
        assert_eq!(ledger.penalized_count(), 0);
    }

    #[test]
    fn test_boundary_is_eligible() {
        let start = Instant::now();
        let mut ledger = PenaltyLedger::new(Duration::from_secs(60));
        ledger.record(&[5], start);
        assert!(ledger.check(&[5], start + Duration::from_secs(60)).is_ok());
    }
}
