//! Error types for the definition registry

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Duplicate definition {canonical}: already loaded from {existing}, also in {incoming}")]
    DuplicateDefinition {
        canonical: String,
        existing: String,
        incoming: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
