//! Match finalization
//!
//! Runs outside the engine task and owns the assembled teams until every
//! group has an outcome: readiness confirmation when enabled, then server
//! allocation. The engine hears about the end of the readiness phase as soon
//! as it happens, and about the groups that must go back to search and the
//! players to penalize once the task is done.

use super::allocator::ServerAllocator;
use super::group::{Group, Team};
use super::readiness::{ReadinessCoordinator, ReadinessOutcome};
use crate::error::MatchmakingError;
use crate::metrics::MetricsCollector;
use crate::types::{CancelReason, GroupId, MatchId, PlayerId, SearchOutcome, TeamRoster};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Messages from finalization tasks to the engine
#[derive(Debug)]
pub(crate) enum FinalizeEvent {
    /// Readiness phase over; confirmations for these players go nowhere now
    ReadinessClosed {
        match_id: MatchId,
        players: Vec<PlayerId>,
    },
    Concluded(MatchConcluded),
}

/// Report from a finished finalization task back to the engine
#[derive(Debug)]
pub(crate) struct MatchConcluded {
    pub match_id: MatchId,
    /// Every group that took part, whatever happened to it
    pub group_ids: Vec<GroupId>,
    pub requeue: Vec<Group>,
    pub penalize: Vec<PlayerId>,
    pub allocated: bool,
    /// The allocator was asked and failed or timed out
    pub allocation_failed: bool,
    pub cancelled: usize,
}

#[derive(Clone)]
pub(crate) struct Finalizer {
    allocator: Arc<dyn ServerAllocator>,
    metrics: Arc<MetricsCollector>,
    destination: String,
    allocator_timeout: Duration,
    readiness: Option<ReadinessCoordinator>,
    penalize_unaccepted: bool,
    requeue_on_failure: bool,
}

impl Finalizer {
    pub fn new(
        allocator: Arc<dyn ServerAllocator>,
        metrics: Arc<MetricsCollector>,
        destination: String,
        allocator_timeout: Duration,
    ) -> Self {
        Self {
            allocator,
            metrics,
            destination,
            allocator_timeout,
            readiness: None,
            penalize_unaccepted: false,
            requeue_on_failure: true,
        }
    }

    pub fn with_readiness(mut self, window: Duration, penalize_unaccepted: bool) -> Self {
        self.readiness = Some(ReadinessCoordinator::new(window));
        self.penalize_unaccepted = penalize_unaccepted;
        self
    }

    pub fn requeue_on_failure(mut self, requeue: bool) -> Self {
        self.requeue_on_failure = requeue;
        self
    }

    pub fn checks_readiness(&self) -> bool {
        self.readiness.is_some()
    }

    pub async fn finalize(
        &self,
        match_id: MatchId,
        mut teams: Vec<Team>,
        confirmations: Option<mpsc::UnboundedReceiver<PlayerId>>,
        events: &mpsc::UnboundedSender<FinalizeEvent>,
    ) -> MatchConcluded {
        let group_ids: Vec<GroupId> = teams
            .iter()
            .flat_map(|t| t.groups().iter().map(|g| g.id.clone()))
            .collect();
        let mut concluded = MatchConcluded {
            match_id,
            group_ids,
            requeue: Vec::new(),
            penalize: Vec::new(),
            allocated: false,
            allocation_failed: false,
            cancelled: 0,
        };

        if let (Some(coordinator), Some(mut confirmations)) = (&self.readiness, confirmations) {
            let outcome = coordinator
                .await_confirmations(&mut teams, &mut confirmations)
                .await;
            let players = teams.iter().flat_map(|t| t.players().map(|p| p.id)).collect();
            let _ = events.send(FinalizeEvent::ReadinessClosed { match_id, players });

            match outcome {
                ReadinessOutcome::AllReady => {
                    self.metrics.record_readiness(true);
                    info!("Match {}: all players ready", match_id);
                }
                ReadinessOutcome::TimedOut { not_ready } => {
                    self.metrics.record_readiness(false);
                    warn!(
                        "Match {}: readiness window closed with {} players unconfirmed",
                        match_id,
                        not_ready.len()
                    );

                    let partition = ReadinessCoordinator::partition(teams);
                    for mut group in partition.rejected {
                        group.cancel(CancelReason::NotReady);
                        self.metrics.record_group_cancelled(CancelReason::NotReady);
                        concluded.cancelled += 1;
                    }
                    concluded.requeue = partition.requeue;
                    if self.penalize_unaccepted {
                        concluded.penalize = partition.not_ready_players;
                    }
                    return concluded;
                }
            }
        }

        if teams
            .iter()
            .any(|t| t.groups().iter().any(Group::is_abandoned))
        {
            return self.release_abandoned(teams, concluded);
        }

        self.allocate(teams, concluded).await
    }

    /// A caller went away before a server was requested: drop its group and
    /// send the others back to search without allocating
    fn release_abandoned(&self, teams: Vec<Team>, mut concluded: MatchConcluded) -> MatchConcluded {
        for group in teams.into_iter().flat_map(Team::into_groups) {
            if group.is_abandoned() {
                info!(
                    "Match {}: group {} abandoned by its caller",
                    concluded.match_id, group.id
                );
                self.metrics.record_group_cancelled(CancelReason::Removed);
                concluded.cancelled += 1;
            } else {
                concluded.requeue.push(group);
            }
        }
        concluded
    }

    async fn allocate(&self, teams: Vec<Team>, mut concluded: MatchConcluded) -> MatchConcluded {
        let match_id = concluded.match_id;
        let rosters: Vec<TeamRoster> = teams.iter().map(Team::roster).collect();

        let timer = self.metrics.start_timer();
        let result = match timeout(
            self.allocator_timeout,
            self.allocator.allocate(&rosters, &self.destination),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MatchmakingError::AllocatorUnavailable {
                reason: format!("no answer within {:?}", self.allocator_timeout),
            }
            .into()),
        };
        self.metrics.record_allocation(result.is_ok(), timer.stop());

        let groups = teams.into_iter().flat_map(Team::into_groups);
        match result {
            Ok(server_id) => {
                info!(
                    "Match {} allocated to server {} ({} groups)",
                    match_id,
                    server_id,
                    concluded.group_ids.len()
                );
                for mut group in groups {
                    group.resolve(SearchOutcome::MatchFound {
                        server_id: server_id.clone(),
                        match_id,
                    });
                }
                concluded.allocated = true;
            }
            Err(e) => {
                error!("Match {}: server allocation failed: {}", match_id, e);
                concluded.allocation_failed = true;
                if self.requeue_on_failure {
                    concluded.requeue = groups.collect();
                } else {
                    for mut group in groups {
                        group.cancel(CancelReason::AllocationFailed);
                        self.metrics
                            .record_group_cancelled(CancelReason::AllocationFailed);
                        concluded.cancelled += 1;
                    }
                }
            }
        }

        concluded
    }
}
