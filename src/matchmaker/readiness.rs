//! Readiness confirmation for assembled matches
//!
//! While a match waits for its players, the engine routes each confirmation
//! to that match's channel through [`WaitingPlayers`]. The finalization task
//! drains the channel with [`ReadinessCoordinator::await_confirmations`]
//! until every player has confirmed or the window closes.

use super::group::{Group, Team};
use crate::types::{MatchId, PlayerId};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

#[derive(Debug)]
struct Route {
    match_id: MatchId,
    confirmations: mpsc::UnboundedSender<PlayerId>,
}

/// Routes readiness confirmations to the match a player is waiting in
#[derive(Debug, Default)]
pub struct WaitingPlayers {
    routes: HashMap<PlayerId, Route>,
}

impl WaitingPlayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        match_id: MatchId,
        players: &[PlayerId],
        confirmations: &mpsc::UnboundedSender<PlayerId>,
    ) {
        for &player_id in players {
            self.routes.insert(
                player_id,
                Route {
                    match_id,
                    confirmations: confirmations.clone(),
                },
            );
        }
    }

    /// Forward a confirmation. Returns false if the player is not waiting.
    pub fn confirm(&self, player_id: PlayerId) -> bool {
        self.routes
            .get(&player_id)
            .is_some_and(|route| route.confirmations.send(player_id).is_ok())
    }

    /// Drop the routes a match registered. Routes since taken over by another
    /// match are left alone.
    pub fn deregister(&mut self, match_id: MatchId, players: &[PlayerId]) {
        for player_id in players {
            if self
                .routes
                .get(player_id)
                .is_some_and(|route| route.match_id == match_id)
            {
                self.routes.remove(player_id);
            }
        }
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.routes.contains_key(&player_id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    AllReady,
    TimedOut { not_ready: Vec<PlayerId> },
}

/// Groups of a timed-out match, split by whether every member confirmed
#[derive(Debug, Default)]
pub struct ReadinessPartition {
    pub requeue: Vec<Group>,
    pub rejected: Vec<Group>,
    pub not_ready_players: Vec<PlayerId>,
}

#[derive(Debug, Clone)]
pub struct ReadinessCoordinator {
    window: Duration,
}

impl ReadinessCoordinator {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Reset every player's flag, then collect confirmations until all
    /// players are ready or the window closes.
    pub async fn await_confirmations(
        &self,
        teams: &mut [Team],
        confirmations: &mut mpsc::UnboundedReceiver<PlayerId>,
    ) -> ReadinessOutcome {
        let mut pending: HashSet<PlayerId> = HashSet::new();
        for team in teams.iter_mut() {
            for group in team.groups_mut() {
                for player in group.players.iter_mut() {
                    player.ready = false;
                    pending.insert(player.id);
                }
            }
        }

        let deadline = Instant::now() + self.window;
        while !pending.is_empty() {
            match timeout_at(deadline, confirmations.recv()).await {
                Ok(Some(player_id)) => {
                    if pending.remove(&player_id) {
                        mark_ready(teams, player_id);
                        debug!("Player {} ready, {} pending", player_id, pending.len());
                    }
                }
                // Routes dropped: nobody can confirm anymore
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if pending.is_empty() {
            ReadinessOutcome::AllReady
        } else {
            let mut not_ready: Vec<PlayerId> = pending.into_iter().collect();
            not_ready.sort_unstable();
            ReadinessOutcome::TimedOut { not_ready }
        }
    }

    /// A group with any unconfirmed player is rejected, the rest go back to
    /// search.
    pub fn partition(teams: Vec<Team>) -> ReadinessPartition {
        let mut partition = ReadinessPartition::default();
        for group in teams.into_iter().flat_map(Team::into_groups) {
            if group.all_ready() {
                partition.requeue.push(group);
            } else {
                partition
                    .not_ready_players
                    .extend(group.players.iter().filter(|p| !p.ready).map(|p| p.id));
                partition.rejected.push(group);
            }
        }
        partition
    }
}

fn mark_ready(teams: &mut [Team], player_id: PlayerId) {
    for team in teams.iter_mut() {
        for group in team.groups_mut() {
            for player in group.players.iter_mut().filter(|p| p.id == player_id) {
                player.ready = true;
            }
        }
    }
}
