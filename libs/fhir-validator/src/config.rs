//! Validator and session configuration.
//!
//! Configs are plain serde documents (YAML or JSON, every field defaulted)
//! and are compiled into a [`ValidationPlan`](crate::ValidationPlan) before
//! use.

use crate::error::ConfigError;
use crate::plan::ValidationPlan;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vigil_context::DuplicatePolicy;
use vigil_registry_client::RegistryConfig;

/// Package loaded by [`ValidatorSession::initialize`](crate::ValidatorSession::initialize)
/// unless the config names others.
pub const DEFAULT_BASE_PACKAGE: &str = "hl7.fhir.r4.core#4.0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Report warning and information issues.
    pub include_warnings: bool,
    pub max_issues: usize,
    /// Nesting depth at which the walk stops with an error.
    pub max_depth: usize,
    pub schema: SchemaConfig,
    pub profiles: ProfilesConfig,
    pub terminology: TerminologyConfig,
    pub constraints: ConstraintsConfig,
    pub must_support: MustSupportConfig,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            include_warnings: true,
            max_issues: 1000,
            max_depth: 64,
            schema: SchemaConfig::default(),
            profiles: ProfilesConfig::default(),
            terminology: TerminologyConfig::default(),
            constraints: ConstraintsConfig::default(),
            must_support: MustSupportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Accept instance properties no element definition describes.
    pub allow_unknown_elements: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Profiles closed to additions: unknown properties are errors while
    /// validating against them.
    pub closed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminologyConfig {
    pub timeout_ms: u64,
    /// Memoized membership answers; 0 disables the cache.
    pub cache_size: usize,
}

impl Default for TerminologyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            cache_size: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintsConfig {
    pub enabled: bool,
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MustSupportConfig {
    /// Report absent mustSupport elements as information issues.
    pub report: bool,
}

impl ValidatorConfig {
    pub fn builder() -> ValidatorConfigBuilder {
        ValidatorConfigBuilder::default()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check the config and compile it into a plan.
    pub fn compile(&self) -> Result<ValidationPlan, ConfigError> {
        if self.max_issues == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_issues must be greater than zero".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_depth must be greater than zero".to_string(),
            ));
        }
        if self.terminology.timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "terminology.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(ValidationPlan::from(self))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidatorConfigBuilder {
    config: ValidatorConfig,
}

impl ValidatorConfigBuilder {
    pub fn include_warnings(mut self, include: bool) -> Self {
        self.config.include_warnings = include;
        self
    }

    pub fn max_issues(mut self, max: usize) -> Self {
        self.config.max_issues = max;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn allow_unknown_elements(mut self, allow: bool) -> Self {
        self.config.schema.allow_unknown_elements = allow;
        self
    }

    pub fn closed_profile(mut self, url: impl Into<String>) -> Self {
        self.config.profiles.closed.push(url.into());
        self
    }

    pub fn terminology_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.terminology.timeout_ms = timeout_ms;
        self
    }

    pub fn terminology_cache_size(mut self, size: usize) -> Self {
        self.config.terminology.cache_size = size;
        self
    }

    pub fn constraints(mut self, enabled: bool) -> Self {
        self.config.constraints.enabled = enabled;
        self
    }

    pub fn report_must_support(mut self, report: bool) -> Self {
        self.config.must_support.report = report;
        self
    }

    pub fn build(self) -> ValidatorConfig {
        self.config
    }
}

/// Everything a [`ValidatorSession`](crate::ValidatorSession) needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub registry: RegistryConfig,
    pub validation: ValidatorConfig,
    /// Package references loaded by `initialize()`.
    pub base_packages: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            validation: ValidatorConfig::default(),
            base_packages: vec![DEFAULT_BASE_PACKAGE.to_string()],
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Per-call overrides of the session's [`RegistryConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub registry_url: Option<String>,
    pub http_timeout_ms: Option<u64>,
    pub cache_packages: Option<bool>,
    pub cache_dir: Option<PathBuf>,
    pub retries: Option<u32>,
    pub load_dependencies: Option<bool>,
}

impl LoadOptions {
    pub fn is_empty(&self) -> bool {
        *self == LoadOptions::default()
    }

    /// `base` with every set override applied.
    pub fn apply(&self, base: &RegistryConfig) -> RegistryConfig {
        let mut config = base.clone();
        if let Some(url) = &self.registry_url {
            config.registry_url = url.clone();
        }
        if let Some(timeout) = self.http_timeout_ms {
            config.http_timeout_ms = timeout;
        }
        if let Some(cache) = self.cache_packages {
            config.cache_packages = cache;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(load) = self.load_dependencies {
            config.load_dependencies = load;
        }
        config
    }
}
