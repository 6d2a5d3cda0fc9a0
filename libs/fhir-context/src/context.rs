//! Read access to conformance resources.

use std::sync::Arc;
use vigil_models::{CodeSystem, StructureDefinition, ValueSet};

/// Base URL for core type definitions.
pub const CORE_STRUCTURE_DEFINITION_BASE: &str = "http://hl7.org/fhir/StructureDefinition/";

/// Split `url|version` into its parts.
pub fn split_canonical(canonical: &str) -> (&str, Option<&str>) {
    match canonical.split_once('|') {
        Some((url, version)) if !version.is_empty() => (url, Some(version)),
        Some((url, _)) => (url, None),
        None => (canonical, None),
    }
}

/// Canonical URL of the definition for a type code. Absolute URLs (logical
/// models) are returned as-is.
pub fn type_definition_url(type_code: &str) -> String {
    if type_code.contains("://") {
        type_code.to_string()
    } else {
        format!("{CORE_STRUCTURE_DEFINITION_BASE}{type_code}")
    }
}

/// Lookup of conformance resources by canonical URL.
///
/// `version: None` means "whatever the context considers current"; for the
/// [`DefinitionRegistry`](crate::DefinitionRegistry) that is the most
/// recently ingested entry.
pub trait FhirContext: Send + Sync {
    fn structure_definition(&self, url: &str, version: Option<&str>)
        -> Option<Arc<StructureDefinition>>;

    fn value_set(&self, url: &str, version: Option<&str>) -> Option<Arc<ValueSet>>;

    fn code_system(&self, url: &str, version: Option<&str>) -> Option<Arc<CodeSystem>>;

    /// Resolve a canonical that may carry a `|version` suffix.
    fn get_structure_definition(&self, canonical: &str) -> Option<Arc<StructureDefinition>> {
        let (url, version) = split_canonical(canonical);
        self.structure_definition(url, version)
    }

    fn get_value_set(&self, canonical: &str) -> Option<Arc<ValueSet>> {
        let (url, version) = split_canonical(canonical);
        self.value_set(url, version)
    }

    fn get_code_system(&self, canonical: &str) -> Option<Arc<CodeSystem>> {
        let (url, version) = split_canonical(canonical);
        self.code_system(url, version)
    }

    /// Definition of a data type or resource type by its type code.
    fn type_definition(&self, type_code: &str) -> Option<Arc<StructureDefinition>> {
        self.structure_definition(&type_definition_url(type_code), None)
    }
}

impl<T: FhirContext + ?Sized> FhirContext for Arc<T> {
    fn structure_definition(
        &self,
        url: &str,
        version: Option<&str>,
    ) -> Option<Arc<StructureDefinition>> {
        (**self).structure_definition(url, version)
    }

    fn value_set(&self, url: &str, version: Option<&str>) -> Option<Arc<ValueSet>> {
        (**self).value_set(url, version)
    }

    fn code_system(&self, url: &str, version: Option<&str>) -> Option<Arc<CodeSystem>> {
        (**self).code_system(url, version)
    }
}
