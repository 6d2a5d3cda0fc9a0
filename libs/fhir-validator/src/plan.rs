use crate::config::{
    ConstraintsConfig, MustSupportConfig, ProfilesConfig, SchemaConfig, TerminologyConfig,
    ValidatorConfig,
};
use std::collections::HashSet;
use std::time::Duration;

/// Compiled validation settings
#[derive(Debug, Clone)]
pub struct ValidationPlan {
    pub include_warnings: bool,
    pub max_issues: usize,
    pub max_depth: usize,
    pub schema: SchemaPlan,
    pub profiles: ProfilesPlan,
    pub terminology: TerminologyPlan,
    pub constraints: ConstraintsPlan,
    pub must_support: MustSupportPlan,
}

impl From<&ValidatorConfig> for ValidationPlan {
    fn from(cfg: &ValidatorConfig) -> Self {
        Self {
            include_warnings: cfg.include_warnings,
            max_issues: cfg.max_issues,
            max_depth: cfg.max_depth,
            schema: SchemaPlan::from(&cfg.schema),
            profiles: ProfilesPlan::from(&cfg.profiles),
            terminology: TerminologyPlan::from(&cfg.terminology),
            constraints: ConstraintsPlan::from(&cfg.constraints),
            must_support: MustSupportPlan::from(&cfg.must_support),
        }
    }
}

impl Default for ValidationPlan {
    fn default() -> Self {
        Self::from(&ValidatorConfig::default())
    }
}

// ============================================================================
// Section Plans
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchemaPlan {
    pub allow_unknown_elements: bool,
}

impl From<&SchemaConfig> for SchemaPlan {
    fn from(cfg: &SchemaConfig) -> Self {
        Self {
            allow_unknown_elements: cfg.allow_unknown_elements,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfilesPlan {
    /// Profile URLs whose passes treat unknown properties as errors.
    pub closed: HashSet<String>,
}

impl ProfilesPlan {
    pub fn is_closed(&self, url: &str) -> bool {
        self.closed.contains(url)
    }
}

impl From<&ProfilesConfig> for ProfilesPlan {
    fn from(cfg: &ProfilesConfig) -> Self {
        Self {
            closed: cfg.closed.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerminologyPlan {
    pub timeout: Duration,
    pub cache_size: usize,
}

impl From<&TerminologyConfig> for TerminologyPlan {
    fn from(cfg: &TerminologyConfig) -> Self {
        Self {
            timeout: Duration::from_millis(cfg.timeout_ms),
            cache_size: cfg.cache_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstraintsPlan {
    pub enabled: bool,
}

impl From<&ConstraintsConfig> for ConstraintsPlan {
    fn from(cfg: &ConstraintsConfig) -> Self {
        Self {
            enabled: cfg.enabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MustSupportPlan {
    pub report: bool,
}

impl From<&MustSupportConfig> for MustSupportPlan {
    fn from(cfg: &MustSupportConfig) -> Self {
        Self { report: cfg.report }
    }
}
