//! Configuration management for the lineup service
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values for the matchmaking service.

pub mod app;
pub mod matchmaker;

// Re-export commonly used types
pub use app::{
    validate_config, AllocatorMode, AllocatorSettings, AppConfig, DirectorySettings,
    ServiceSettings,
};
pub use matchmaker::MatchmakerSettings;
