//! The validator session: loaded packages plus a validator over them.

use crate::config::{LoadOptions, SessionConfig, ValidatorConfig};
use crate::constraints::ConstraintEvaluator;
use crate::engine::{ValidateOptions, Validator};
use crate::error::{SessionError, ValidateError};
use crate::outcome::ValidationOutcome;
use crate::terminology::{CachedTerminology, RegistryTerminology, TerminologyProvider};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use vigil_context::{DefinitionRegistry, DuplicatePolicy, LoadedPackage};
use vigil_registry_client::{PackageReference, RegistryClient, RegistryConfig};

type SessionTerminology = CachedTerminology<Arc<dyn TerminologyProvider>>;

/// What one `load_ig` call added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedIg {
    pub name: String,
    pub version: String,
    /// Definitions registered from the root package.
    pub resource_count: usize,
    /// Root package first, then the dependencies loaded with it.
    pub packages: Vec<LoadedPackage>,
}

/// Packages, definitions and caches of one validation context.
///
/// Definitions live until [`reset`](Self::reset). `load_ig` calls are
/// serialized; `validate` calls run concurrently against whatever is loaded.
///
/// ```rust,no_run
/// use serde_json::json;
/// use vigil_validator::{LoadOptions, SessionConfig, ValidateOptions, ValidatorSession};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = ValidatorSession::new(SessionConfig::default())?;
/// session.initialize().await?;
/// session.load_ig("hl7.fhir.us.core@6.1.0", &LoadOptions::default()).await?;
///
/// let outcome = session
///     .validate(&json!({"resourceType": "Patient"}), &ValidateOptions::default())
///     .await?;
/// println!("{}", outcome.to_operation_outcome());
/// # Ok(())
/// # }
/// ```
pub struct ValidatorSession {
    config: SessionConfig,
    registry: Arc<DefinitionRegistry>,
    validator: Validator<Arc<DefinitionRegistry>>,
    terminology_cache: Option<Arc<SessionTerminology>>,
    client: RegistryClient,
    load_lock: Mutex<()>,
    initialized: AtomicBool,
}

impl ValidatorSession {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ValidatorSessionBuilder {
        ValidatorSessionBuilder::default()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    pub fn validator(&self) -> &Validator<Arc<DefinitionRegistry>> {
        &self.validator
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Load the configured base packages. Calling it again only loads base
    /// packages that are not loaded yet.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        for reference in &self.config.base_packages {
            self.load_ig(reference, &LoadOptions::default()).await?;
        }
        self.initialized.store(true, Ordering::Release);
        info!(
            packages = self.registry.loaded_packages().len(),
            definitions = self.registry.len(),
            "validator session initialized"
        );
        Ok(())
    }

    /// Load an IG (and its dependencies) and return the number of
    /// definitions registered from it.
    pub async fn load_ig(&self, reference: &str, options: &LoadOptions) -> Result<usize, SessionError> {
        Ok(self.load_ig_with_metadata(reference, options).await?.resource_count)
    }

    /// Load an IG and describe what was loaded.
    ///
    /// A registry reference to a package that is already loaded (at the
    /// requested version, or any version when none is given) is not fetched
    /// again. On failure the registry is left as it was.
    pub async fn load_ig_with_metadata(
        &self,
        reference: &str,
        options: &LoadOptions,
    ) -> Result<LoadedIg, SessionError> {
        let reference = PackageReference::parse(reference)?;
        let _guard = self.load_lock.lock().await;

        if let Some(existing) = self.already_loaded(&reference) {
            debug!(package = %existing.name, version = %existing.version, "package already loaded");
            return Ok(LoadedIg {
                name: existing.name.clone(),
                version: existing.version.clone(),
                resource_count: existing.resource_count,
                packages: vec![existing],
            });
        }

        let skip: HashSet<String> = self
            .registry
            .loaded_packages()
            .into_iter()
            .map(|p| p.name)
            .collect();
        let packages = if options.is_empty() {
            self.client.resolve(&reference, &skip).await?
        } else {
            let client = RegistryClient::new(options.apply(self.client.config()))?;
            client.resolve(&reference, &skip).await?
        };

        let report = self.registry.ingest(&packages)?;
        let context = self.validator.context();
        for canonical in report.replaced.iter().chain(&report.superseded) {
            let url = canonical.split_once('|').map_or(canonical.as_str(), |(url, _)| url);
            context.invalidate(url);
        }
        if let Some(cache) = &self.terminology_cache {
            cache.clear();
        }

        let Some(root) = report.packages.first().cloned() else {
            return Err(SessionError::Acquisition(vigil_registry_client::Error::PackageNotFound {
                name: reference.to_string(),
                version: "*".to_string(),
            }));
        };
        info!(
            package = %root.name,
            version = %root.version,
            definitions = report.count,
            dependencies = report.packages.len() - 1,
            skipped = report.skipped.len(),
            "loaded implementation guide"
        );
        Ok(LoadedIg {
            name: root.name.clone(),
            version: root.version.clone(),
            resource_count: root.resource_count,
            packages: report.packages,
        })
    }

    fn already_loaded(&self, reference: &PackageReference) -> Option<LoadedPackage> {
        let PackageReference::Registry { name, version } = reference else {
            return None;
        };
        self.registry.loaded_packages().into_iter().find(|p| {
            &p.name == name && version.as_deref().map_or(true, |v| v == p.version)
        })
    }

    /// Validate a resource against its resource type's base definition and
    /// the profiles it declares, or against `options.profile` only.
    pub async fn validate(
        &self,
        resource: &Value,
        options: &ValidateOptions,
    ) -> Result<ValidationOutcome, ValidateError> {
        if !self.is_initialized() {
            return Err(ValidateError::NotInitialized);
        }
        self.validator.validate(resource, options).await
    }

    /// Versions the registry publishes for `name`, oldest first.
    pub async fn list_package_versions(&self, name: &str) -> Result<Vec<String>, SessionError> {
        Ok(self.client.list_package_versions(name).await?)
    }

    pub async fn get_latest_package_version(&self, name: &str) -> Result<String, SessionError> {
        Ok(self.client.get_latest_package_version(name).await?)
    }

    pub fn loaded_packages(&self) -> Vec<LoadedPackage> {
        self.registry.loaded_packages()
    }

    /// Forget every loaded package, definition and cached answer. The
    /// session must be initialized again before validating.
    pub async fn reset(&self) {
        let _guard = self.load_lock.lock().await;
        self.registry.clear();
        self.validator.context().clear();
        if let Some(cache) = &self.terminology_cache {
            cache.clear();
        }
        self.initialized.store(false, Ordering::Release);
        info!("validator session reset");
    }
}

/// Builder for [`ValidatorSession`].
///
/// Without an explicit terminology provider, bindings are checked against
/// the ValueSets and CodeSystems of the loaded packages.
#[derive(Default)]
pub struct ValidatorSessionBuilder {
    config: SessionConfig,
    terminology: Option<Arc<dyn TerminologyProvider>>,
    constraints: Option<Arc<dyn ConstraintEvaluator>>,
}

impl ValidatorSessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.config.registry = registry;
        self
    }

    pub fn validation(mut self, validation: ValidatorConfig) -> Self {
        self.config.validation = validation;
        self
    }

    pub fn base_packages<I, S>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.base_packages = references.into_iter().map(Into::into).collect();
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.duplicate_policy = policy;
        self
    }

    pub fn terminology(mut self, provider: Arc<dyn TerminologyProvider>) -> Self {
        self.terminology = Some(provider);
        self
    }

    pub fn constraint_evaluator(mut self, evaluator: Arc<dyn ConstraintEvaluator>) -> Self {
        self.constraints = Some(evaluator);
        self
    }

    pub fn build(self) -> Result<ValidatorSession, SessionError> {
        let Self {
            config,
            terminology,
            constraints,
        } = self;

        let plan = config.validation.compile()?;
        let client = RegistryClient::new(config.registry.clone())?;
        let registry = Arc::new(DefinitionRegistry::new(config.duplicate_policy));

        let provider: Arc<dyn TerminologyProvider> = terminology
            .unwrap_or_else(|| Arc::new(RegistryTerminology::new(Arc::clone(&registry))));
        let (provider, terminology_cache) = if plan.terminology.cache_size > 0 {
            let cached = Arc::new(CachedTerminology::new(provider, plan.terminology.cache_size));
            (Arc::clone(&cached) as Arc<dyn TerminologyProvider>, Some(cached))
        } else {
            (provider, None)
        };

        let mut validator = Validator::new(plan, Arc::clone(&registry)).with_terminology(provider);
        if let Some(evaluator) = constraints {
            validator = validator.with_constraint_evaluator(evaluator);
        }

        Ok(ValidatorSession {
            config,
            registry,
            validator,
            terminology_cache,
            client,
            load_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
        })
    }
}
