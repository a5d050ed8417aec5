//! Match Simulation CLI Tool
//!
//! Feeds a random population of groups through an in-process matching
//! engine and reports how well they were matched.
//!
//! Usage:
//!   cargo run --bin match-sim -- --help
//!   cargo run --bin match-sim -- --groups 500 --team-size 5 --radius 50
//!   cargo run --bin match-sim -- --groups 200 --max-group-size 3 --seed 7

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::Parser;
use lineup::config::{AppConfig, MatchmakerSettings};
use lineup::matchmaker::{EngineSettings, InMemoryPlayerDirectory, MatchingEngine};
use lineup::metrics::MetricsCollector;
use lineup::types::{PlayerId, PlayerRecord, Rating, SearchOutcome, ServerId, TeamRoster};
use lineup::ServerAllocator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "match-sim")]
#[command(about = "Simulate skill-based matchmaking over a random population of groups")]
struct Cli {
    /// Number of groups to enqueue
    #[arg(short, long, default_value = "100")]
    groups: usize,

    /// Players per team
    #[arg(long, default_value = "5")]
    team_size: usize,

    /// Teams per match
    #[arg(long, default_value = "2")]
    team_count: usize,

    /// Rating offsets searched around each anchor
    #[arg(short, long, default_value = "100")]
    radius: u32,

    /// Largest generated group
    #[arg(long, default_value = "2")]
    max_group_size: usize,

    /// Lowest player rating
    #[arg(long, default_value = "1000")]
    min_rating: Rating,

    /// Highest player rating
    #[arg(long, default_value = "2000")]
    max_rating: Rating,

    /// Random seed, for repeatable runs
    #[arg(long, default_value = "42")]
    seed: u64,
}

/// Allocator that remembers every match it was asked to host
#[derive(Default)]
struct RecordingAllocator {
    matches: Mutex<Vec<Vec<TeamRoster>>>,
}

impl RecordingAllocator {
    fn matches(&self) -> Vec<Vec<TeamRoster>> {
        self.matches
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ServerAllocator for RecordingAllocator {
    async fn allocate(&self, rosters: &[TeamRoster], _destination: &str) -> Result<ServerId> {
        let mut matches = self
            .matches
            .lock()
            .map_err(|_| anyhow!("Failed to acquire match log lock"))?;
        matches.push(rosters.to_vec());
        Ok(format!("sim-server-{}", matches.len()))
    }
}

/// Random groups and the ratings of their players
struct Population {
    groups: Vec<(String, Vec<PlayerId>)>,
    ratings: HashMap<PlayerId, Rating>,
}

impl Population {
    fn generate(cli: &Cli, rng: &mut StdRng) -> Self {
        let max_group_size = cli.max_group_size.clamp(1, cli.team_size.max(1));
        let mut groups = Vec::with_capacity(cli.groups);
        let mut ratings = HashMap::new();
        let mut next_player: PlayerId = 1;

        for i in 0..cli.groups {
            let size = rng.gen_range(1..=max_group_size);
            let center = rng.gen_range(cli.min_rating..=cli.max_rating);
            let mut players = Vec::with_capacity(size);
            for _ in 0..size {
                let rating = (center + rng.gen_range(-25..=25)).max(0);
                ratings.insert(next_player, rating);
                players.push(next_player);
                next_player += 1;
            }
            groups.push((format!("group-{}", i + 1), players));
        }

        Self { groups, ratings }
    }

    fn records(&self) -> Vec<PlayerRecord> {
        self.ratings
            .iter()
            .map(|(&id, &rating)| PlayerRecord::new(id, rating))
            .collect()
    }

    /// Difference between the highest and lowest group average in a match
    fn match_spread(&self, rosters: &[TeamRoster]) -> i64 {
        let averages: Vec<Rating> = rosters
            .iter()
            .flat_map(|roster| roster.groups.iter())
            .map(|group| {
                let sum: Rating = group.iter().filter_map(|id| self.ratings.get(id)).sum();
                sum / group.len().max(1) as Rating
            })
            .collect();
        lineup::utils::rating_spread(&averages)
    }
}

/// Wait until no match is in flight and no new match has started for a
/// couple of polls
async fn wait_until_settled(handle: &lineup::MatchmakerHandle) -> Result<()> {
    let mut last_started = u64::MAX;
    let mut quiet_polls = 0;
    while quiet_polls < 3 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = handle.stats().await?;
        if stats.matches_in_progress == 0 && stats.matches_started == last_started {
            quiet_polls += 1;
        } else {
            quiet_polls = 0;
        }
        last_started = stats.matches_started;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if cli.min_rating > cli.max_rating {
        return Err(anyhow!("--min-rating must not exceed --max-rating"));
    }

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let population = Population::generate(&cli, &mut rng);
    let player_total = population.ratings.len();

    println!("🎲 Lineup match simulation");
    println!(
        "   {} groups, {} players, {} teams of {}, radius {}",
        population.groups.len(),
        player_total,
        cli.team_count,
        cli.team_size,
        cli.radius
    );

    let mut config = AppConfig::default();
    config.matchmaker = MatchmakerSettings {
        team_size: cli.team_size,
        team_count: cli.team_count,
        max_rating_spread_to_search: cli.radius,
        ..MatchmakerSettings::default()
    };
    lineup::config::validate_config(&config)?;

    let directory = Arc::new(InMemoryPlayerDirectory::with_players(population.records()));
    let allocator = Arc::new(RecordingAllocator::default());
    let metrics = Arc::new(MetricsCollector::new()?);
    let (handle, engine_task) = MatchingEngine::spawn(
        EngineSettings::from_config(&config),
        directory,
        allocator.clone(),
        metrics,
    )?;

    let mut tickets = Vec::with_capacity(population.groups.len());
    for (group_id, players) in &population.groups {
        tickets.push(handle.add_group(group_id.clone(), players.clone()).await?);
    }
    info!("Enqueued {} groups", tickets.len());

    wait_until_settled(&handle).await?;
    let stats = handle.stats().await?;
    handle.shutdown().await?;
    engine_task.await?;

    let mut matched_groups = 0;
    let mut cancelled_groups = 0;
    for ticket in tickets {
        let group_id = ticket.group_id().to_string();
        match ticket.outcome().await {
            SearchOutcome::MatchFound { server_id, .. } => {
                debug!("{} -> {}", group_id, server_id);
                matched_groups += 1;
            }
            SearchOutcome::Cancelled { reason } => {
                debug!("{} cancelled: {}", group_id, reason);
                cancelled_groups += 1;
            }
        }
    }

    let matches = allocator.matches();
    let spreads: Vec<i64> = matches
        .iter()
        .map(|rosters| population.match_spread(rosters))
        .collect();

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("   Matches formed: {}", matches.len());
    println!("   Groups matched: {}", matched_groups);
    println!(
        "   Groups left in search: {} ({} players)",
        stats.groups_searching, stats.players_searching
    );
    println!("   Groups cancelled at shutdown: {}", cancelled_groups);
    if spreads.is_empty() {
        println!("   Average match spread: n/a");
    } else {
        let average = spreads.iter().sum::<i64>() as f64 / spreads.len() as f64;
        let worst = spreads.iter().max().copied().unwrap_or_default();
        println!("   Average match spread: {:.1}", average);
        println!("   Widest match spread: {}", worst);
    }

    Ok(())
}
