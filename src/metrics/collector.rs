//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the lineup matchmaking
//! service using Prometheus metrics.

use crate::types::CancelReason;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Search admission and queue metrics
    search_metrics: SearchMetrics,

    /// Assembly, readiness and allocation metrics
    match_metrics: MatchMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Search-related metrics
#[derive(Clone)]
pub struct SearchMetrics {
    /// Groups admitted to search
    pub groups_admitted_total: IntCounter,

    /// Groups refused at admission, by reason
    pub groups_rejected_total: IntCounterVec,

    /// Groups whose search ended without a match, by reason
    pub groups_cancelled_total: IntCounterVec,

    /// Groups currently searching
    pub groups_searching: IntGauge,

    /// Players currently searching
    pub players_searching: IntGauge,

    /// Players currently inside a readiness window
    pub players_awaiting_readiness: IntGauge,

    /// Time from admission until a group leaves the queue in a match
    pub search_wait_time_seconds: Histogram,
}

/// Match-related metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Assembly attempts, by outcome
    pub assembly_attempts_total: IntCounterVec,

    /// Matches assembled
    pub matches_formed_total: IntCounter,

    /// Readiness windows, by outcome
    pub readiness_outcomes_total: IntCounterVec,

    /// Players penalized for missing a readiness window
    pub penalties_recorded_total: IntCounter,

    /// Allocation requests, by status
    pub allocations_total: IntCounterVec,

    /// Difference between the strongest and weakest group average in a match
    pub match_rating_spread: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Time for one assembly attempt
    pub assembly_duration: Histogram,

    /// Time for one allocation request
    pub allocation_duration: Histogram,

    /// Time for one directory lookup
    pub directory_lookup_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let search_metrics = SearchMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            search_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get search metrics
    pub fn search(&self) -> &SearchMetrics {
        &self.search_metrics
    }

    /// Get match metrics
    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    pub fn record_group_admitted(&self) {
        self.search_metrics.groups_admitted_total.inc();
    }

    /// Record a refused admission; `reason` is an error kind label
    pub fn record_group_rejected(&self, reason: &str) {
        self.search_metrics
            .groups_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_group_cancelled(&self, reason: CancelReason) {
        self.search_metrics
            .groups_cancelled_total
            .with_label_values(&[&reason.to_string()])
            .inc();
    }

    pub fn record_search_wait(&self, waited: Duration) {
        self.search_metrics
            .search_wait_time_seconds
            .observe(waited.as_secs_f64());
    }

    /// Refresh the pool gauges from the engine's current state
    pub fn update_pool_gauges(&self, groups: usize, players: usize, awaiting_readiness: usize) {
        self.search_metrics.groups_searching.set(groups as i64);
        self.search_metrics.players_searching.set(players as i64);
        self.search_metrics
            .players_awaiting_readiness
            .set(awaiting_readiness as i64);
    }

    /// Record one assembly attempt
    pub fn record_assembly(&self, matched: bool, duration: Duration) {
        let outcome = if matched { "matched" } else { "no_match" };
        self.match_metrics
            .assembly_attempts_total
            .with_label_values(&[outcome])
            .inc();

        self.performance_metrics
            .assembly_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_match_formed(&self, rating_spread: i64) {
        self.match_metrics.matches_formed_total.inc();
        self.match_metrics
            .match_rating_spread
            .observe(rating_spread as f64);
    }

    pub fn record_readiness(&self, all_ready: bool) {
        let outcome = if all_ready { "all_ready" } else { "timed_out" };
        self.match_metrics
            .readiness_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_penalties(&self, players: usize) {
        self.match_metrics
            .penalties_recorded_total
            .inc_by(players as u64);
    }

    /// Record an allocation request
    pub fn record_allocation(&self, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };
        self.match_metrics
            .allocations_total
            .with_label_values(&[status])
            .inc();

        self.performance_metrics
            .allocation_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_directory_lookup(&self, duration: Duration) {
        self.performance_metrics
            .directory_lookup_duration
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("lineup_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "lineup_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("lineup_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl SearchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let groups_admitted_total =
            IntCounter::new("lineup_groups_admitted_total", "Groups admitted to search")?;
        registry.register(Box::new(groups_admitted_total.clone()))?;

        let groups_rejected_total = IntCounterVec::new(
            Opts::new(
                "lineup_groups_rejected_total",
                "Groups refused at admission",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(groups_rejected_total.clone()))?;

        let groups_cancelled_total = IntCounterVec::new(
            Opts::new(
                "lineup_groups_cancelled_total",
                "Searches ended without a match",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(groups_cancelled_total.clone()))?;

        let groups_searching =
            IntGauge::new("lineup_groups_searching", "Groups currently searching")?;
        registry.register(Box::new(groups_searching.clone()))?;

        let players_searching =
            IntGauge::new("lineup_players_searching", "Players currently searching")?;
        registry.register(Box::new(players_searching.clone()))?;

        let players_awaiting_readiness = IntGauge::new(
            "lineup_players_awaiting_readiness",
            "Players inside a readiness window",
        )?;
        registry.register(Box::new(players_awaiting_readiness.clone()))?;

        let search_wait_time_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "lineup_search_wait_time_seconds",
                "Time spent searching before a match",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        registry.register(Box::new(search_wait_time_seconds.clone()))?;

        Ok(Self {
            groups_admitted_total,
            groups_rejected_total,
            groups_cancelled_total,
            groups_searching,
            players_searching,
            players_awaiting_readiness,
            search_wait_time_seconds,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let assembly_attempts_total = IntCounterVec::new(
            Opts::new(
                "lineup_assembly_attempts_total",
                "Team assembly attempts",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(assembly_attempts_total.clone()))?;

        let matches_formed_total =
            IntCounter::new("lineup_matches_formed_total", "Matches assembled")?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let readiness_outcomes_total = IntCounterVec::new(
            Opts::new(
                "lineup_readiness_outcomes_total",
                "Readiness windows by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(readiness_outcomes_total.clone()))?;

        let penalties_recorded_total = IntCounter::new(
            "lineup_penalties_recorded_total",
            "Players penalized for missing a readiness window",
        )?;
        registry.register(Box::new(penalties_recorded_total.clone()))?;

        let allocations_total = IntCounterVec::new(
            Opts::new("lineup_allocations_total", "Server allocation requests"),
            &["status"],
        )?;
        registry.register(Box::new(allocations_total.clone()))?;

        let match_rating_spread = Histogram::with_opts(
            HistogramOpts::new(
                "lineup_match_rating_spread",
                "Rating spread between groups of one match",
            )
            .buckets(vec![0.0, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 500.0]),
        )?;
        registry.register(Box::new(match_rating_spread.clone()))?;

        Ok(Self {
            assembly_attempts_total,
            matches_formed_total,
            readiness_outcomes_total,
            penalties_recorded_total,
            allocations_total,
            match_rating_spread,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let assembly_duration = Histogram::with_opts(
            HistogramOpts::new(
                "lineup_assembly_duration_seconds",
                "Team assembly attempt time",
            )
            .buckets(vec![0.00001, 0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(assembly_duration.clone()))?;

        let allocation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "lineup_allocation_duration_seconds",
                "Server allocation time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(allocation_duration.clone()))?;

        let directory_lookup_duration = Histogram::with_opts(
            HistogramOpts::new(
                "lineup_directory_lookup_duration_seconds",
                "Player directory lookup time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0]),
        )?;
        registry.register(Box::new(directory_lookup_duration.clone()))?;

        Ok(Self {
            assembly_duration,
            allocation_duration,
            directory_lookup_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        // Test that we can access all metric groups
        let _service = collector.service();
        let _search = collector.search();
        let _matches = collector.matches();
        let _performance = collector.performance();
    }

    #[test]
    fn test_search_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_group_admitted();
        collector.record_group_rejected("duplicate_group");
        collector.record_group_cancelled(CancelReason::Removed);
        collector.update_pool_gauges(3, 7, 2);

        assert_eq!(collector.search().groups_admitted_total.get(), 1);
        assert_eq!(
            collector
                .search()
                .groups_rejected_total
                .with_label_values(&["duplicate_group"])
                .get(),
            1
        );
        assert_eq!(
            collector
                .search()
                .groups_cancelled_total
                .with_label_values(&["removed"])
                .get(),
            1
        );
        assert_eq!(collector.search().players_searching.get(), 7);
    }

    #[test]
    fn test_match_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_assembly(true, Duration::from_micros(50));
        collector.record_assembly(false, Duration::from_micros(20));
        collector.record_match_formed(12);
        collector.record_readiness(false);
        collector.record_penalties(3);
        collector.record_allocation(true, Duration::from_millis(5));

        let matches = collector.matches();
        assert_eq!(
            matches
                .assembly_attempts_total
                .with_label_values(&["no_match"])
                .get(),
            1
        );
        assert_eq!(matches.matches_formed_total.get(), 1);
        assert_eq!(matches.penalties_recorded_total.get(), 3);
        assert_eq!(
            matches.allocations_total.with_label_values(&["success"]).get(),
            1
        );
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.update_health_status(2); // Healthy
        collector.update_component_health("matching_engine", true);
        collector.update_component_health("request_api", false);
        assert_eq!(collector.service().health_status.get(), 2);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.elapsed();

        assert!(duration >= Duration::from_millis(10));

        let final_duration = timer.stop();
        assert!(final_duration >= Duration::from_millis(10));
    }
}
