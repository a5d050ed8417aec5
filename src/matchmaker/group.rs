//! Players, search groups and teams
//!
//! A [`Group`] is the unit that enters and leaves search. Its caller keeps a
//! [`SearchTicket`] that resolves exactly once, either with a server or with
//! a cancellation.

use crate::error::{MatchmakingError, Result};
use crate::types::{
    CancelReason, GroupId, PlayerId, PlayerRecord, Rating, SearchOutcome, TeamRoster,
};
use crate::utils::{average_rating, rating_spread};
use std::collections::HashSet;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// A player as seen by one match attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub rating: Rating,
    /// Network quality hint, if the request layer supplied one
    pub ping_ms: Option<u32>,
    /// Outcome of the previous match, if known
    pub won_last_match: Option<bool>,
    /// Readiness confirmation; only meaningful during a readiness phase
    pub ready: bool,
}

impl Player {
    pub fn new(id: PlayerId, rating: Rating) -> Self {
        Self {
            id,
            rating,
            ping_ms: None,
            won_last_match: None,
            ready: false,
        }
    }
}

impl From<PlayerRecord> for Player {
    fn from(record: PlayerRecord) -> Self {
        Self::new(record.id, record.rating)
    }
}

/// Caller's half of a group's result channel
#[derive(Debug)]
pub struct SearchTicket {
    group_id: GroupId,
    receiver: oneshot::Receiver<SearchOutcome>,
}

impl SearchTicket {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Wait for the terminal outcome of the search
    pub async fn outcome(self) -> SearchOutcome {
        self.receiver.await.unwrap_or(SearchOutcome::Cancelled {
            reason: CancelReason::EngineStopped,
        })
    }

    /// Non-blocking poll, `None` while the group is still searching
    pub fn try_outcome(&mut self) -> Option<SearchOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(SearchOutcome::Cancelled {
                reason: CancelReason::EngineStopped,
            }),
        }
    }
}

/// A pre-formed set of players searching together
#[derive(Debug)]
pub struct Group {
    pub id: GroupId,
    pub players: Vec<Player>,
    sum_rating: Rating,
    avg_rating: Rating,
    selected_for_match: bool,
    enqueued_at: Instant,
    notifier: Option<oneshot::Sender<SearchOutcome>>,
}

impl Group {
    /// Build a group and the ticket its caller waits on.
    ///
    /// Fails when the group has no players or lists a player twice.
    pub fn new(id: impl Into<GroupId>, players: Vec<Player>) -> Result<(Self, SearchTicket)> {
        let id = id.into();
        if players.is_empty() {
            return Err(MatchmakingError::InvalidGroup {
                reason: format!("group {} has no players", id),
            }
            .into());
        }

        let mut seen = HashSet::with_capacity(players.len());
        if let Some(dup) = players.iter().find(|p| !seen.insert(p.id)) {
            return Err(MatchmakingError::InvalidGroup {
                reason: format!("player {} listed twice in group {}", dup.id, id),
            }
            .into());
        }

        let sum_rating: Rating = players.iter().map(|p| p.rating).sum();
        let avg_rating = average_rating(sum_rating, players.len());
        let (sender, receiver) = oneshot::channel();

        let group = Self {
            id: id.clone(),
            players,
            sum_rating,
            avg_rating,
            selected_for_match: false,
            enqueued_at: Instant::now(),
            notifier: Some(sender),
        };
        let ticket = SearchTicket {
            group_id: id,
            receiver,
        };

        Ok((group, ticket))
    }

    pub fn size(&self) -> usize {
        self.players.len()
    }

    pub fn sum_rating(&self) -> Rating {
        self.sum_rating
    }

    pub fn avg_rating(&self) -> Rating {
        self.avg_rating
    }

    /// Difference between the strongest and weakest member
    pub fn rating_spread(&self) -> i64 {
        let ratings: Vec<Rating> = self.players.iter().map(|p| p.rating).collect();
        rating_spread(&ratings)
    }

    pub fn is_selected(&self) -> bool {
        self.selected_for_match
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.selected_for_match = selected;
    }

    /// When the group last entered the search queue
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub(crate) fn mark_enqueued(&mut self) {
        self.enqueued_at = Instant::now();
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id).collect()
    }

    pub fn all_ready(&self) -> bool {
        self.players.iter().all(|p| p.ready)
    }

    /// Deliver the terminal outcome. Never blocks; a caller that stopped
    /// listening is ignored. Returns false if the group was already resolved
    /// or nobody was listening.
    pub fn resolve(&mut self, outcome: SearchOutcome) -> bool {
        match self.notifier.take() {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&mut self, reason: CancelReason) -> bool {
        self.resolve(SearchOutcome::Cancelled { reason })
    }

    /// True once nobody is waiting on the ticket, either because it was
    /// dropped or because the group already has its outcome
    pub fn is_abandoned(&self) -> bool {
        self.notifier
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }
}

/// Groups assembled toward one side of a match
#[derive(Debug, Default)]
pub struct Team {
    groups: Vec<Group>,
    num_players: usize,
}

impl Team {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, group: Group) {
        self.num_players += group.size();
        self.groups.push(group);
    }

    pub fn num_players(&self) -> usize {
        self.num_players
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [Group] {
        &mut self.groups
    }

    pub fn into_groups(self) -> Vec<Group> {
        self.groups
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.groups.iter().flat_map(|g| g.players.iter())
    }

    pub fn roster(&self) -> TeamRoster {
        TeamRoster {
            groups: self.groups.iter().map(Group::player_ids).collect(),
        }
    }
}
