//! Lineup - skill-based team matchmaking
//!
//! Pre-formed groups of players search together. The matching engine packs
//! groups with close average ratings into teams, optionally waits for every
//! player to confirm, and hands the finished match to a game server
//! allocator. Every search ends with exactly one outcome: a server or a
//! cancellation reason.

pub mod api;
pub mod config;
pub mod error;
pub mod matchmaker;
pub mod metrics;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use matchmaker::{
    HttpServerAllocator, InMemoryPlayerDirectory, LocalServerAllocator, MatchingEngine,
    MatchmakerHandle, PlayerDirectory, SearchTicket, ServerAllocator,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
