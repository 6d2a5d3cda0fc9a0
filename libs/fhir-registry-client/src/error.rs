//! Error types for registry-client

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Package acquisition errors
#[derive(Error, Debug)]
pub enum Error {
    /// Network or file errors while fetching a package.
    #[error("Source unreachable: {location}: {reason}")]
    SourceUnreachable { location: String, reason: String },

    /// The reference is neither a directory, archive, URL nor registry token.
    #[error("Unsupported package reference: {0}")]
    UnsupportedFormat(String),

    /// The registry has no version matching the request.
    #[error("Package not found: {name}#{version}")]
    PackageNotFound { name: String, version: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Package error: {0}")]
    Package(#[from] vigil_package::PackageError),
}

impl Error {
    pub(crate) fn unreachable(location: impl Into<String>, reason: impl ToString) -> Self {
        Error::SourceUnreachable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}
