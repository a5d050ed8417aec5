//! Skill-based team matchmaking
//!
//! Groups of players enter search through a [`MatchmakerHandle`]. The
//! [`MatchingEngine`] assembles teams of groups with close average ratings,
//! optionally waits for every player to confirm, and asks a
//! [`ServerAllocator`] for a game server. Each group's [`SearchTicket`]
//! resolves exactly once with the server or the reason the search ended.

pub mod allocator;
pub mod assembler;
pub mod directory;
pub mod engine;
mod finalize;
pub mod group;
pub mod index;
pub mod penalty;
pub mod queue;
pub mod readiness;

pub use allocator::{HttpServerAllocator, LocalServerAllocator, ServerAllocator};
pub use assembler::{AssemblyError, TeamAssembler};
pub use directory::{InMemoryPlayerDirectory, PlayerDirectory};
pub use engine::{EngineSettings, EngineStats, MatchingEngine, MatchmakerHandle};
pub use group::{Group, Player, SearchTicket, Team};
pub use index::RatingIndex;
pub use penalty::PenaltyLedger;
pub use queue::{SearchPool, SearchQueue};
pub use readiness::{ReadinessCoordinator, ReadinessOutcome, WaitingPlayers};
