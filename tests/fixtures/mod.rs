//! Test fixtures and mock implementations for integration testing

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use lineup::config::MatchmakerSettings;
use lineup::error::Result;
use lineup::matchmaker::{EngineSettings, InMemoryPlayerDirectory, MatchingEngine};
use lineup::metrics::MetricsCollector;
use lineup::types::{PlayerId, PlayerRecord, Rating, ServerId, TeamRoster};
use lineup::{MatchmakerHandle, PlayerDirectory, ServerAllocator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Allocation request captured by [`RecordingAllocator`]
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub rosters: Vec<TeamRoster>,
    pub destination: String,
}

/// Allocator that captures every request and hands out sequential IDs
#[derive(Debug, Default)]
pub struct RecordingAllocator {
    requests: Mutex<Vec<AllocationRequest>>,
}

impl RecordingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all allocation requests (for testing)
    pub fn requests(&self) -> Vec<AllocationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }
}

#[async_trait]
impl ServerAllocator for RecordingAllocator {
    async fn allocate(&self, rosters: &[TeamRoster], destination: &str) -> Result<ServerId> {
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| anyhow!("allocation log poisoned"))?;
        requests.push(AllocationRequest {
            rosters: rosters.to_vec(),
            destination: destination.to_string(),
        });
        Ok(format!("server-{}", requests.len()))
    }
}

/// Allocator that fails a fixed number of times, then succeeds
#[derive(Debug)]
pub struct FlakyAllocator {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
}

impl FlakyAllocator {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Take `delay` to answer every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn always_failing() -> Self {
        Self::failing(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerAllocator for FlakyAllocator {
    async fn allocate(&self, _rosters: &[TeamRoster], _destination: &str) -> Result<ServerId> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if failing {
            Err(anyhow!("server manager returned 503"))
        } else {
            Ok(format!("server-after-{}-calls", call))
        }
    }
}

/// Allocator that takes `delay` to answer
#[derive(Debug)]
pub struct SlowAllocator {
    pub delay: Duration,
}

#[async_trait]
impl ServerAllocator for SlowAllocator {
    async fn allocate(&self, _rosters: &[TeamRoster], _destination: &str) -> Result<ServerId> {
        tokio::time::sleep(self.delay).await;
        Ok("slow-server".to_string())
    }
}

/// Directory that never answers
#[derive(Debug, Default)]
pub struct HangingDirectory;

#[async_trait]
impl PlayerDirectory for HangingDirectory {
    async fn resolve(
        &self,
        _ids: &[PlayerId],
        _deadline: tokio::time::Instant,
    ) -> Result<Vec<PlayerRecord>> {
        std::future::pending().await
    }
}

/// Directory pre-populated with `(id, rating)` pairs
pub fn directory(players: &[(PlayerId, Rating)]) -> Arc<InMemoryPlayerDirectory> {
    Arc::new(InMemoryPlayerDirectory::with_players(
        players
            .iter()
            .map(|&(id, rating)| PlayerRecord::new(id, rating)),
    ))
}

/// Settings for a match of `team_count` teams of `team_size`
pub fn settings(team_size: usize, team_count: usize, radius: u32) -> MatchmakerSettings {
    MatchmakerSettings {
        team_size,
        team_count,
        max_rating_spread_to_search: radius,
        ..MatchmakerSettings::default()
    }
}

/// A running engine plus the pieces tests inspect
pub struct TestEngine {
    pub handle: MatchmakerHandle,
    pub task: JoinHandle<()>,
    pub metrics: Arc<MetricsCollector>,
}

impl TestEngine {
    pub fn spawn(
        matchmaker: MatchmakerSettings,
        directory: Arc<dyn PlayerDirectory>,
        allocator: Arc<dyn ServerAllocator>,
    ) -> Self {
        let settings = EngineSettings {
            matchmaker,
            destination: "test-destination".to_string(),
            ..EngineSettings::default()
        };
        Self::spawn_with(settings, directory, allocator)
    }

    pub fn spawn_with(
        settings: EngineSettings,
        directory: Arc<dyn PlayerDirectory>,
        allocator: Arc<dyn ServerAllocator>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let (handle, task) = MatchingEngine::spawn(settings, directory, allocator, metrics.clone())
            .expect("engine settings");
        Self {
            handle,
            task,
            metrics,
        }
    }

    /// Poll the engine until `condition` holds on its stats
    pub async fn wait_for<F>(&self, condition: F)
    where
        F: Fn(&lineup::matchmaker::EngineStats) -> bool,
    {
        for _ in 0..200 {
            let stats = self.handle.stats().await.expect("engine stats");
            if condition(&stats) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine never reached the expected state");
    }
}
