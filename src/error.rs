//! Error types for index maintenance and configuration
//!
//! Peer-attributable rule failures are not errors in this sense; they are
//! reported as [`crate::validation::RuleViolation`] values.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Unknown parent block: {0}")]
    UnknownParent(String),

    #[error("Block already indexed: {0}")]
    DuplicateBlock(String),

    #[error("Second genesis header offered: {0}")]
    DuplicateGenesis(String),

    #[error("Unknown block: {0}")]
    UnknownBlock(String),

    #[error("Unknown block index node: {0}")]
    UnknownNode(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Block index store error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
