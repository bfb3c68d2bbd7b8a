// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod market;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use error::{CollaboratorError, CycleError, LedgerError};
pub use models::*;
pub use orchestrator::{CycleOrchestrator, CycleResult, TraderState};

// Error handling for I/O adapters (Redis, Postgres)
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
