//! Error types for snapshot generation

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("StructureDefinition not found: {0}")]
    NotFound(String),

    #[error("Base definition {base} of {url} not found")]
    BaseNotFound { url: String, base: String },

    #[error("Circular baseDefinition chain: {}", chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    #[error("StructureDefinition {url} has neither snapshot nor differential")]
    NothingToGenerate { url: String },

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}
