use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors `validate` returns instead of an outcome. Everything wrong with
/// the resource itself is reported as issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidateError {
    #[error("validator session is not initialized; call initialize() first")]
    NotInitialized,

    #[error("unknown profile: {0}")]
    UnknownProfile(String),
}

/// Session-level failures: acquiring or registering packages.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Acquisition(#[from] vigil_registry_client::Error),

    #[error(transparent)]
    Definitions(#[from] vigil_context::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
