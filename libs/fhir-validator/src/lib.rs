//! FHIR profile-conformance validation
//!
//! A [`ValidatorSession`] loads implementation guides through the registry
//! client into a [`DefinitionRegistry`](vigil_context::DefinitionRegistry)
//! and validates JSON resources against the base definition of their type
//! and the profiles they declare. Findings come back as a
//! [`ValidationOutcome`], convertible to an OperationOutcome.
//!
//! The pieces the session wires together are usable on their own:
//! [`Validator`] over any [`FhirContext`](vigil_context::FhirContext),
//! pluggable [`TerminologyProvider`]s and [`ConstraintEvaluator`]s, and the
//! slice matcher in [`slicing`].
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use vigil_validator::{LoadOptions, SessionConfig, ValidateOptions, ValidatorSession};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = ValidatorSession::new(SessionConfig::default())?;
//! session.initialize().await?;
//! let ig = session
//!     .load_ig_with_metadata("hl7.fhir.us.core@6.1.0", &LoadOptions::default())
//!     .await?;
//! println!("loaded {}#{} ({} definitions)", ig.name, ig.version, ig.resource_count);
//!
//! let patient = json!({
//!     "resourceType": "Patient",
//!     "meta": {"profile": ["http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient"]},
//!     "name": [{"family": "Chalmers"}]
//! });
//! let outcome = session.validate(&patient, &ValidateOptions::default()).await?;
//! for issue in &outcome.issues {
//!     println!("{:?} {:?}: {}", issue.severity, issue.expression, issue.diagnostics);
//! }
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod compare;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod plan;
pub mod primitive;
pub mod session;
pub mod slicing;
pub mod terminology;
pub mod tree;

pub use binding::{CodedValue, PendingBinding};
pub use config::{
    ConstraintsConfig, LoadOptions, MustSupportConfig, ProfilesConfig, SchemaConfig,
    SessionConfig, TerminologyConfig, ValidatorConfig, ValidatorConfigBuilder,
    DEFAULT_BASE_PACKAGE,
};
pub use constraints::{ConstraintEvaluator, EvaluationError, NoopConstraintEvaluator};
pub use engine::{ValidateOptions, Validator};
pub use error::{ConfigError, SessionError, ValidateError};
pub use outcome::{IssueCode, IssueSeverity, ValidationIssue, ValidationOutcome};
pub use plan::ValidationPlan;
pub use session::{LoadedIg, ValidatorSession, ValidatorSessionBuilder};
pub use terminology::{
    CachedTerminology, Membership, PermissiveTerminology, RegistryTerminology,
    TerminologyProvider,
};
pub use tree::ElementTree;

pub use vigil_context::{DuplicatePolicy, LoadedPackage};
pub use vigil_registry_client::RegistryConfig;
