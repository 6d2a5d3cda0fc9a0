//! Registry client configuration.

use crate::registry::RequestPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REGISTRY_URL: &str = "https://packages.fhir.org";

/// How packages are acquired and cached. Every field has a default, so a
/// partial YAML/JSON document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RegistryConfig {
    pub registry_url: String,
    pub http_timeout_ms: u64,
    pub cache_packages: bool,
    /// Cache root; `~/.fhir/packages` when unset.
    pub cache_dir: Option<PathBuf>,
    pub retries: u32,
    /// Resolve manifest dependencies after loading a package.
    pub load_dependencies: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            http_timeout_ms: 30_000,
            cache_packages: true,
            cache_dir: None,
            retries: 0,
            load_dependencies: true,
        }
    }
}

impl RegistryConfig {
    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy {
            timeout: Duration::from_millis(self.http_timeout_ms),
            retries: self.retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_fill_defaults() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"registry_url": "http://localhost:9000", "retries": 2}"#)
                .unwrap();
        assert_eq!(config.registry_url, "http://localhost:9000");
        assert_eq!(config.retries, 2);
        assert_eq!(config.http_timeout_ms, 30_000);
        assert!(config.cache_packages);
        assert_eq!(config.request_policy().timeout, Duration::from_secs(30));
    }
}
