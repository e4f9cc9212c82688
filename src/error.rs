//! Domain error type for the orchestration core.
//!
//! Storage and collaborator seams return `anyhow::Result`; the variants here are
//! the failures callers actually branch on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A configuration value is missing or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A config-store write could not be read back with the written value.
    #[error("config store write for `{key}` did not verify (wrote {expected}, read {actual})")]
    Verification {
        key: String,
        expected: String,
        actual: String,
    },

    /// A cycle name was registered twice with the scheduler.
    #[error("cycle `{0}` is already registered")]
    DuplicateCycle(String),

    /// Agent DNA violates its invariants.
    #[error("invalid agent dna: {0}")]
    InvalidDna(String),

    /// Catch-all wrapper for storage and collaborator failures.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
