// Core modules
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod settings;
pub mod store;
pub mod types;

// Engines
pub mod agent;
pub mod core;
pub mod evolution;
pub mod healing;
pub mod strategy;

// Outer surfaces
pub mod api;
pub mod collaborators;
pub mod orchestrator;

#[cfg(test)]
mod testing;

// Re-export key types and functions
pub use clock::{Clock, SystemClock};
pub use collaborators::{Collaborators, ContentServiceClient};
pub use config::OrchestratorConfig;
pub use db::{DatabaseConfig, SurrealStore, create_connection, ensure_schema};
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{BurstDecision, Orchestrator, OrchestratorDeps, StatusSnapshot};
pub use store::{ConfigStore, Store};
