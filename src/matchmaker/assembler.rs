//! Team assembly around the queue head
//!
//! One call to [`TeamAssembler::assemble`] is one matching attempt: the group
//! at the head of the queue becomes the anchor, and every team is filled from
//! groups whose average rating sits within the search radius of the anchor's.
//! An attempt either withdraws all chosen groups from the pool or leaves the
//! pool exactly as it found it, except that a failed anchor moves to the back.

use super::group::Team;
use super::queue::SearchPool;
use crate::config::MatchmakerSettings;
use crate::types::GroupId;
use tracing::debug;

/// Why an attempt produced no match
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error("Search queue is empty")]
    EmptyQueue,

    #[error("No compatible group found for anchor {anchor}")]
    NoCompatibleGroupFound { anchor: GroupId },

    #[error("Group {group_id} left search during assembly")]
    GroupVanished { group_id: GroupId },

    #[error("Cannot assemble {team_count} teams of {team_size} players")]
    InvalidShape { team_size: usize, team_count: usize },
}

#[derive(Debug, Default)]
struct TeamDraft {
    group_ids: Vec<GroupId>,
    num_players: usize,
}

#[derive(Debug, Clone)]
pub struct TeamAssembler {
    team_size: usize,
    team_count: usize,
    search_radius: u32,
}

impl TeamAssembler {
    /// Fails unless there is at least one team of at least one player
    pub fn new(
        team_size: usize,
        team_count: usize,
        search_radius: u32,
    ) -> Result<Self, AssemblyError> {
        if team_size == 0 || team_count == 0 {
            return Err(AssemblyError::InvalidShape {
                team_size,
                team_count,
            });
        }
        Ok(Self {
            team_size,
            team_count,
            search_radius,
        })
    }

    pub fn from_settings(settings: &MatchmakerSettings) -> Result<Self, AssemblyError> {
        Self::new(
            settings.team_size,
            settings.team_count,
            settings.max_rating_spread_to_search,
        )
    }

    /// Try to build a full match around the queue head
    pub fn assemble(&self, pool: &mut SearchPool) -> Result<Vec<Team>, AssemblyError> {
        let anchor_id = pool.front().cloned().ok_or(AssemblyError::EmptyQueue)?;
        let (anchor_rating, anchor_size) = match pool.get_mut(&anchor_id) {
            Some(anchor) => {
                anchor.set_selected(true);
                (anchor.avg_rating(), anchor.size())
            }
            None => {
                return Err(AssemblyError::GroupVanished {
                    group_id: anchor_id,
                })
            }
        };

        let mut drafts: Vec<TeamDraft> = (0..self.team_count).map(|_| TeamDraft::default()).collect();
        let mut touched = vec![anchor_id.clone()];
        if let Some(first) = drafts.first_mut() {
            first.group_ids.push(anchor_id.clone());
            first.num_players = anchor_size;
        }

        for (team_no, draft) in drafts.iter_mut().enumerate() {
            while draft.num_players < self.team_size {
                let shortfall = self.team_size - draft.num_players;
                let Some(candidate_id) =
                    pool.find_candidate(anchor_rating, shortfall, self.search_radius)
                else {
                    debug!(
                        "Anchor {} (rating {}): team {} stuck at {}/{} players",
                        anchor_id, anchor_rating, team_no, draft.num_players, self.team_size
                    );
                    self.roll_back(pool, &touched, &anchor_id);
                    return Err(AssemblyError::NoCompatibleGroupFound {
                        anchor: anchor_id,
                    });
                };

                let Some(candidate) = pool.get_mut(&candidate_id) else {
                    self.roll_back(pool, &touched, &anchor_id);
                    return Err(AssemblyError::GroupVanished {
                        group_id: candidate_id,
                    });
                };
                candidate.set_selected(true);
                draft.num_players += candidate.size();
                draft.group_ids.push(candidate_id.clone());
                touched.push(candidate_id);
            }
        }

        if let Some(missing) = touched.iter().find(|id| !pool.contains(id)) {
            let group_id = missing.clone();
            self.roll_back(pool, &touched, &anchor_id);
            return Err(AssemblyError::GroupVanished { group_id });
        }

        let teams = drafts
            .into_iter()
            .map(|draft| {
                let mut team = Team::new();
                for id in &draft.group_ids {
                    if let Some(group) = pool.withdraw(id) {
                        team.add(group);
                    }
                }
                team
            })
            .collect();

        debug!(
            "Assembled {} teams around anchor {} (rating {})",
            self.team_count, anchor_id, anchor_rating
        );
        Ok(teams)
    }

    fn roll_back(&self, pool: &mut SearchPool, touched: &[GroupId], anchor_id: &str) {
        for id in touched {
            if let Some(group) = pool.get_mut(id) {
                group.set_selected(false);
            }
        }
        pool.move_to_back(anchor_id);
    }
}
