//! Definition registry for FHIR conformance resources.
//!
//! [`DefinitionRegistry`] indexes StructureDefinitions, ValueSets and
//! CodeSystems from loaded packages by canonical URL and version, and is the
//! [`FhirContext`] every other component reads definitions through.

pub mod context;
pub mod error;
pub mod registry;

pub use context::{split_canonical, type_definition_url, FhirContext, CORE_STRUCTURE_DEFINITION_BASE};
pub use error::{Error, Result};
pub use registry::{DefinitionRegistry, DuplicatePolicy, IngestReport, LoadedPackage};
