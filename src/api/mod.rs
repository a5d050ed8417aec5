//! HTTP request layer for the matchmaking service

pub mod server;

pub use server::{ApiServer, ApiServerConfig, CancelRequest, ReadyRequest, SearchRequest};
