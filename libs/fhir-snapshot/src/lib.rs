//! FHIR StructureDefinition snapshot generation
//!
//! A profile's snapshot is its base type's snapshot with the profile's
//! differential applied: cardinalities and types narrowed, slices cut,
//! nested data-type elements unfolded where the differential reaches into
//! them. [`ExpandedFhirContext`] generates snapshots on demand through the
//! `baseDefinition` chain and memoizes them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil_context::DefinitionRegistry;
//! use vigil_snapshot::ExpandedFhirContext;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(DefinitionRegistry::default());
//! // registry.ingest(&packages)?;
//! let context = ExpandedFhirContext::new(Arc::clone(&registry));
//! let profile = context.resolve("http://example.org/StructureDefinition/my-patient", None)?;
//! for warning in &profile.warnings {
//!     eprintln!("{warning}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod expanded_context;
pub mod generator;
pub mod merge;
pub mod normalization;
pub mod slicing;
pub mod validation;
pub mod warning;

pub use error::{Error, Result};
pub use expanded_context::{ExpandedFhirContext, ResolvedProfile};
pub use generator::{generate_snapshot, GeneratedSnapshot, NoTypeSnapshots, TypeSnapshots};
pub use vigil_models::{Differential, ElementDefinition, ElementDefinitionType, Snapshot};
pub use validation::{validate_differential, validate_snapshot};
pub use warning::{SnapshotWarning, WarningKind};
