//! The matching engine
//!
//! A single task owns the search pool, the readiness routes and the penalty
//! ledger. Callers talk to it through a cloneable [`MatchmakerHandle`];
//! their requests are serialized with the matching loop, so no engine state
//! is ever shared or locked.
//!
//! Between requests the loop runs one assembly attempt at a time. Once every
//! searching group has failed as anchor without anything changing, the loop
//! sleeps until the next request or finished match. After a failed server
//! allocation, assembly is held off for an exponentially growing delay.

use super::allocator::ServerAllocator;
use super::assembler::{AssemblyError, TeamAssembler};
use super::directory::PlayerDirectory;
use super::finalize::{FinalizeEvent, Finalizer, MatchConcluded};
use super::group::{Group, Player, SearchTicket, Team};
use super::penalty::PenaltyLedger;
use super::queue::SearchPool;
use super::readiness::WaitingPlayers;
use crate::config::{AppConfig, MatchmakerSettings};
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::types::{CancelReason, GroupId, PlayerId, PlayerRecord};
use crate::utils::generate_match_id;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Everything the engine needs besides its collaborators
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub matchmaker: MatchmakerSettings,
    /// Routing target passed to the allocator
    pub destination: String,
    pub allocator_timeout: Duration,
    pub directory_timeout: Duration,
    /// Pause after the first failed allocation, doubled on each further failure
    pub allocation_backoff: Duration,
    pub max_allocation_backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            matchmaker: config.matchmaker.clone(),
            destination: config.allocator.server_manager_addr.clone(),
            allocator_timeout: config.allocator_timeout(),
            directory_timeout: config.directory_timeout(),
            allocation_backoff: config.allocation_backoff(),
            max_allocation_backoff: config.max_allocation_backoff(),
        }
    }
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub groups_searching: usize,
    pub players_searching: usize,
    pub players_awaiting_readiness: usize,
    pub penalized_players: usize,
    pub matches_in_progress: usize,
    pub matches_started: u64,
    pub matches_completed: u64,
    pub groups_cancelled: u64,
}

#[derive(Debug)]
enum Command {
    AddGroup {
        group: Group,
        reply: oneshot::Sender<std::result::Result<(), MatchmakingError>>,
    },
    RemoveGroup {
        group_id: GroupId,
        reply: oneshot::Sender<bool>,
    },
    SetPlayerReady {
        player_id: PlayerId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Step {
    Finalize(FinalizeEvent),
    Command(Option<Command>),
    Assemble,
    Resume,
}

/// Cloneable front door to a running engine
#[derive(Clone)]
pub struct MatchmakerHandle {
    commands: mpsc::UnboundedSender<Command>,
    directory: Arc<dyn PlayerDirectory>,
    directory_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl MatchmakerHandle {
    /// Start searching for a group, using the configured directory timeout
    pub async fn add_group(
        &self,
        group_id: impl Into<GroupId>,
        player_ids: Vec<PlayerId>,
    ) -> Result<SearchTicket> {
        let deadline = Instant::now() + self.directory_timeout;
        self.add_group_by(group_id, player_ids, deadline).await
    }

    /// Start searching for a group. Ratings are looked up before the engine
    /// sees the request; the lookup must finish by `deadline`.
    ///
    /// Returns the ticket that resolves when the search ends. Validation
    /// failures are returned here and the group never enters search.
    pub async fn add_group_by(
        &self,
        group_id: impl Into<GroupId>,
        player_ids: Vec<PlayerId>,
        deadline: Instant,
    ) -> Result<SearchTicket> {
        let group_id = group_id.into();
        if player_ids.is_empty() {
            return Err(self.reject(MatchmakingError::InvalidGroup {
                reason: format!("group {} has no players", group_id),
            }));
        }

        let records = self.resolve_players(&player_ids, deadline).await?;
        let players = records.into_iter().map(Player::from).collect();
        let (group, ticket) = match Group::new(group_id, players) {
            Ok(built) => built,
            Err(e) => {
                if let Some(kind) = e.downcast_ref::<MatchmakingError>().map(|e| e.kind()) {
                    self.metrics.record_group_rejected(kind);
                }
                return Err(e);
            }
        };

        let (reply, response) = oneshot::channel();
        self.send(Command::AddGroup { group, reply })?;
        match response.await {
            Ok(Ok(())) => Ok(ticket),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(MatchmakingError::EngineUnavailable.into()),
        }
    }

    /// Withdraw a searching group; its ticket resolves as removed. Returns
    /// false if the group was not searching.
    pub async fn remove_group(&self, group_id: &str) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::RemoveGroup {
            group_id: group_id.to_string(),
            reply,
        })?;
        response
            .await
            .map_err(|_| MatchmakingError::EngineUnavailable.into())
    }

    /// Confirm a player for the readiness window they are in. Returns false
    /// if the player is not waiting on one.
    pub async fn set_player_ready(&self, player_id: PlayerId) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::SetPlayerReady { player_id, reply })?;
        response
            .await
            .map_err(|_| MatchmakingError::EngineUnavailable.into())
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        response
            .await
            .map_err(|_| MatchmakingError::EngineUnavailable.into())
    }

    /// Stop the engine. Every group still searching resolves as stopped.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        response
            .await
            .map_err(|_| MatchmakingError::EngineUnavailable.into())
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn resolve_players(
        &self,
        player_ids: &[PlayerId],
        deadline: Instant,
    ) -> Result<Vec<PlayerRecord>> {
        let timer = self.metrics.start_timer();
        let lookup = timeout_at(deadline, self.directory.resolve(player_ids, deadline)).await;
        self.metrics.record_directory_lookup(timer.stop());

        let records = match lookup {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                return Err(self.reject(MatchmakingError::DirectoryLookupFailed {
                    reason: lookup_failure_reason(e),
                }))
            }
            Err(_) => {
                return Err(self.reject(MatchmakingError::DirectoryLookupFailed {
                    reason: "lookup deadline exceeded".to_string(),
                }))
            }
        };

        let in_order = records.len() == player_ids.len()
            && records.iter().zip(player_ids).all(|(r, id)| r.id == *id);
        if !in_order {
            return Err(self.reject(MatchmakingError::DirectoryLookupFailed {
                reason: format!(
                    "asked for {} players, directory answered with {}",
                    player_ids.len(),
                    records.len()
                ),
            }));
        }

        Ok(records)
    }

    fn reject(&self, err: MatchmakingError) -> anyhow::Error {
        debug!("Rejected search request: {}", err);
        self.metrics.record_group_rejected(err.kind());
        err.into()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| MatchmakingError::EngineUnavailable.into())
    }
}

fn lookup_failure_reason(err: anyhow::Error) -> String {
    match err.downcast::<MatchmakingError>() {
        Ok(MatchmakingError::DirectoryLookupFailed { reason }) => reason,
        Ok(other) => other.to_string(),
        Err(err) => err.to_string(),
    }
}

/// Single-owner matching loop
pub struct MatchingEngine {
    settings: MatchmakerSettings,
    pool: SearchPool,
    assembler: TeamAssembler,
    waiting: WaitingPlayers,
    penalties: PenaltyLedger,
    finalizer: Finalizer,
    metrics: Arc<MetricsCollector>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<FinalizeEvent>,
    events_rx: mpsc::UnboundedReceiver<FinalizeEvent>,
    /// Groups held by a running finalization task
    in_match: HashSet<GroupId>,
    /// Consecutive anchors that failed with no state change in between
    failed_streak: usize,
    allocation_backoff: Duration,
    max_allocation_backoff: Duration,
    /// Allocations failed since the last success
    allocation_failures: u32,
    /// No assembly before this instant
    retry_at: Option<Instant>,
    matches_in_progress: usize,
    matches_started: u64,
    matches_completed: u64,
    groups_cancelled: u64,
}

impl MatchingEngine {
    /// Fails when the settings describe a match nobody can fill
    pub fn new(
        settings: EngineSettings,
        directory: Arc<dyn PlayerDirectory>,
        allocator: Arc<dyn ServerAllocator>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<(Self, MatchmakerHandle)> {
        let matchmaker = settings.matchmaker;
        let assembler = TeamAssembler::from_settings(&matchmaker).map_err(|e| {
            MatchmakingError::ConfigurationError {
                message: e.to_string(),
            }
        })?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut finalizer = Finalizer::new(
            allocator,
            metrics.clone(),
            settings.destination,
            settings.allocator_timeout,
        )
        .requeue_on_failure(matchmaker.requeue_on_allocation_failure);
        if matchmaker.check_readiness {
            finalizer = finalizer.with_readiness(
                matchmaker.accept_timeout(),
                matchmaker.penalty_for_unaccepted_match,
            );
        }

        let engine = Self {
            assembler,
            penalties: PenaltyLedger::new(matchmaker.penalty_duration()),
            settings: matchmaker,
            pool: SearchPool::new(),
            waiting: WaitingPlayers::new(),
            finalizer,
            metrics: metrics.clone(),
            commands: command_rx,
            events_tx,
            events_rx,
            in_match: HashSet::new(),
            failed_streak: 0,
            allocation_backoff: settings.allocation_backoff,
            max_allocation_backoff: settings.max_allocation_backoff,
            allocation_failures: 0,
            retry_at: None,
            matches_in_progress: 0,
            matches_started: 0,
            matches_completed: 0,
            groups_cancelled: 0,
        };
        let handle = MatchmakerHandle {
            commands: command_tx,
            directory,
            directory_timeout: settings.directory_timeout,
            metrics,
        };

        Ok((engine, handle))
    }

    /// Build an engine and run it on its own task
    pub fn spawn(
        settings: EngineSettings,
        directory: Arc<dyn PlayerDirectory>,
        allocator: Arc<dyn ServerAllocator>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<(MatchmakerHandle, JoinHandle<()>)> {
        let (engine, handle) = Self::new(settings, directory, allocator, metrics)?;
        let task = tokio::spawn(engine.run());
        Ok((handle, task))
    }

    pub async fn run(mut self) {
        info!(
            "Matching engine started: {} teams of {}, search radius {}, readiness {}",
            self.settings.team_count,
            self.settings.team_size,
            self.settings.max_rating_spread_to_search,
            if self.settings.check_readiness {
                "on"
            } else {
                "off"
            }
        );

        loop {
            let step = if let Some(retry_at) = self.retry_at {
                tokio::select! {
                    biased;
                    Some(event) = self.events_rx.recv() => Step::Finalize(event),
                    command = self.commands.recv() => Step::Command(command),
                    _ = sleep_until(retry_at) => Step::Resume,
                }
            } else if self.has_untried_anchor() {
                tokio::select! {
                    biased;
                    Some(event) = self.events_rx.recv() => Step::Finalize(event),
                    command = self.commands.recv() => Step::Command(command),
                    _ = std::future::ready(()) => Step::Assemble,
                }
            } else {
                tokio::select! {
                    biased;
                    Some(event) = self.events_rx.recv() => Step::Finalize(event),
                    command = self.commands.recv() => Step::Command(command),
                }
            };

            match step {
                Step::Finalize(FinalizeEvent::ReadinessClosed { match_id, players }) => {
                    self.waiting.deregister(match_id, &players);
                    self.update_gauges();
                }
                Step::Finalize(FinalizeEvent::Concluded(concluded)) => self.conclude(concluded),
                Step::Command(Some(command)) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Step::Command(None) => {
                    info!("All matchmaker handles dropped");
                    self.stop();
                    break;
                }
                Step::Assemble => {
                    self.try_assemble();
                    tokio::task::yield_now().await;
                }
                Step::Resume => {
                    debug!("Allocation backoff over, resuming assembly");
                    self.retry_at = None;
                    self.failed_streak = 0;
                }
            }
        }

        info!(
            "Matching engine stopped: {} matches started, {} completed",
            self.matches_started, self.matches_completed
        );
    }

    fn has_untried_anchor(&self) -> bool {
        !self.pool.is_empty() && self.failed_streak < self.pool.len()
    }

    /// Returns false once the engine should stop
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::AddGroup { group, reply } => {
                let group_id = group.id.clone();
                if group.is_abandoned() {
                    debug!("Caller of group {} left before admission", group_id);
                    return true;
                }
                let result = self.admit(group);
                match &result {
                    Ok(()) => {
                        self.metrics.record_group_admitted();
                        debug!("Group {} admitted, {} searching", group_id, self.pool.len());
                    }
                    Err(e) => {
                        self.metrics.record_group_rejected(e.kind());
                        debug!("Group {} rejected: {}", group_id, e);
                    }
                }
                let _ = reply.send(result);
            }
            Command::RemoveGroup { group_id, reply } => {
                let removed = match self.pool.withdraw(&group_id) {
                    Some(mut group) => {
                        group.cancel(CancelReason::Removed);
                        self.record_cancelled(CancelReason::Removed);
                        self.failed_streak = 0;
                        info!("Group {} removed from search", group_id);
                        true
                    }
                    None => false,
                };
                let _ = reply.send(removed);
            }
            Command::SetPlayerReady { player_id, reply } => {
                let routed = self.waiting.confirm(player_id);
                if !routed {
                    debug!("Ready signal for player {} with no pending match", player_id);
                }
                let _ = reply.send(routed);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown { reply } => {
                self.stop();
                let _ = reply.send(());
                return false;
            }
        }
        self.update_gauges();
        true
    }

    /// Admission checks, in order: size, duplicate ID, rating spread, penalty
    fn admit(&mut self, group: Group) -> std::result::Result<(), MatchmakingError> {
        if group.players.is_empty() {
            return Err(MatchmakingError::InvalidGroup {
                reason: format!("group {} has no players", group.id),
            });
        }
        if group.size() > self.settings.team_size {
            return Err(MatchmakingError::GroupTooLarge {
                group_id: group.id.clone(),
                size: group.size(),
                team_size: self.settings.team_size,
            });
        }
        if self.pool.contains(&group.id) || self.in_match.contains(&group.id) {
            return Err(MatchmakingError::DuplicateGroup {
                group_id: group.id.clone(),
            });
        }
        if let Some(max) = self.settings.group_spread_cap() {
            let spread = group.rating_spread();
            if spread > max {
                return Err(MatchmakingError::RatingSpreadExceeded {
                    group_id: group.id.clone(),
                    spread,
                    max,
                });
            }
        }
        self.penalties.check(&group.player_ids(), Instant::now())?;

        self.pool
            .admit(group)
            .map_err(|group| MatchmakingError::DuplicateGroup { group_id: group.id })?;
        self.failed_streak = 0;
        Ok(())
    }

    fn try_assemble(&mut self) {
        if self.drop_abandoned_anchor() {
            return;
        }

        let timer = self.metrics.start_timer();
        match self.assembler.assemble(&mut self.pool) {
            Ok(teams) => {
                self.metrics.record_assembly(true, timer.stop());
                self.failed_streak = 0;
                self.start_match(teams);
            }
            Err(AssemblyError::EmptyQueue) | Err(AssemblyError::InvalidShape { .. }) => {}
            Err(AssemblyError::NoCompatibleGroupFound { anchor }) => {
                self.metrics.record_assembly(false, timer.stop());
                self.failed_streak += 1;
                debug!(
                    "No match around {} ({}/{} anchors tried)",
                    anchor,
                    self.failed_streak,
                    self.pool.len()
                );
            }
            Err(e @ AssemblyError::GroupVanished { .. }) => {
                self.metrics.record_assembly(false, timer.stop());
                self.failed_streak += 1;
                warn!("Assembly attempt abandoned: {}", e);
            }
        }
    }

    /// Withdraw the queue head if nobody is waiting on it anymore
    fn drop_abandoned_anchor(&mut self) -> bool {
        let Some(anchor_id) = self.pool.front().cloned() else {
            return false;
        };
        if !self.pool.get(&anchor_id).is_some_and(Group::is_abandoned) {
            return false;
        }

        self.pool.withdraw(&anchor_id);
        self.record_cancelled(CancelReason::Removed);
        self.failed_streak = 0;
        self.update_gauges();
        info!("Group {} abandoned by its caller, dropped from search", anchor_id);
        true
    }

    fn start_match(&mut self, teams: Vec<Team>) {
        let match_id = generate_match_id();
        let mut players: Vec<PlayerId> = Vec::new();
        let mut averages = Vec::new();
        for group in teams.iter().flat_map(|t| t.groups()) {
            self.metrics.record_search_wait(group.enqueued_at().elapsed());
            self.in_match.insert(group.id.clone());
            players.extend(group.players.iter().map(|p| p.id));
            averages.push(group.avg_rating());
        }
        let spread = crate::utils::rating_spread(&averages);

        self.matches_started += 1;
        self.matches_in_progress += 1;
        self.metrics.record_match_formed(spread);

        let confirmations = if self.finalizer.checks_readiness() {
            let (tx, rx) = mpsc::unbounded_channel();
            self.waiting.register(match_id, &players, &tx);
            Some(rx)
        } else {
            None
        };

        info!(
            "Match {} assembled: {} teams, {} players, group rating spread {}",
            match_id,
            teams.len(),
            players.len(),
            spread
        );

        let finalizer = self.finalizer.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let concluded = finalizer
                .finalize(match_id, teams, confirmations, &events)
                .await;
            if events.send(FinalizeEvent::Concluded(concluded)).is_err() {
                debug!("Engine stopped before match {} concluded", match_id);
            }
        });

        self.update_gauges();
    }

    fn conclude(&mut self, concluded: MatchConcluded) {
        for group_id in &concluded.group_ids {
            self.in_match.remove(group_id);
        }
        self.matches_in_progress = self.matches_in_progress.saturating_sub(1);
        self.groups_cancelled += concluded.cancelled as u64;
        if concluded.allocated {
            self.matches_completed += 1;
            self.allocation_failures = 0;
        }
        if concluded.allocation_failed {
            self.allocation_failures = self.allocation_failures.saturating_add(1);
            let delay = self.allocation_retry_delay();
            self.retry_at = Some(Instant::now() + delay);
            warn!(
                "{} allocations failed in a row, holding off assembly for {:?}",
                self.allocation_failures, delay
            );
        }

        if !concluded.penalize.is_empty() {
            let now = Instant::now();
            self.penalties.prune(now);
            self.penalties.record(&concluded.penalize, now);
            self.metrics.record_penalties(concluded.penalize.len());
            info!(
                "Penalized {} players for missing the readiness window of match {}",
                concluded.penalize.len(),
                concluded.match_id
            );
        }

        let mut requeued = 0;
        for group in concluded.requeue {
            if group.is_abandoned() {
                debug!("Group {} abandoned by its caller, not requeued", group.id);
                self.record_cancelled(CancelReason::Removed);
                continue;
            }
            match self.pool.admit(group) {
                Ok(()) => requeued += 1,
                Err(mut group) => {
                    error!("Group {} already searching, cannot requeue", group.id);
                    group.cancel(CancelReason::Removed);
                    self.record_cancelled(CancelReason::Removed);
                }
            }
        }
        if requeued > 0 {
            info!(
                "Match {}: {} groups returned to search",
                concluded.match_id, requeued
            );
        }

        self.failed_streak = 0;
        self.update_gauges();
    }

    /// Cancel everything still searching and drop readiness routes
    fn stop(&mut self) {
        let groups = self.pool.drain();
        let stopped = groups.len();
        for mut group in groups {
            group.cancel(CancelReason::EngineStopped);
            self.record_cancelled(CancelReason::EngineStopped);
        }
        self.waiting.clear();
        self.update_gauges();

        info!(
            "Matching engine stopping: {} searching groups cancelled, {} matches still finalizing",
            stopped, self.matches_in_progress
        );
    }

    /// Backoff doubles per consecutive failure, up to the configured cap
    fn allocation_retry_delay(&self) -> Duration {
        let doublings = self.allocation_failures.saturating_sub(1).min(16);
        self.allocation_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_allocation_backoff)
    }

    fn record_cancelled(&mut self, reason: CancelReason) {
        self.groups_cancelled += 1;
        self.metrics.record_group_cancelled(reason);
    }

    fn stats(&mut self) -> EngineStats {
        self.penalties.prune(Instant::now());
        EngineStats {
            groups_searching: self.pool.len(),
            players_searching: self.pool.player_count(),
            players_awaiting_readiness: self.waiting.len(),
            penalized_players: self.penalties.penalized_count(),
            matches_in_progress: self.matches_in_progress,
            matches_started: self.matches_started,
            matches_completed: self.matches_completed,
            groups_cancelled: self.groups_cancelled,
        }
    }

    fn update_gauges(&self) {
        self.metrics.update_pool_gauges(
            self.pool.len(),
            self.pool.player_count(),
            self.waiting.len(),
        );
    }
}
