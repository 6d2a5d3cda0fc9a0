use crate::error::{Error, Result};
use crate::generator::generate_snapshot;
use crate::warning::SnapshotWarning;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use vigil_context::{split_canonical, type_definition_url, FhirContext};
use vigil_models::{
    CodeSystem, ElementDefinition, ElementDefinitionType, StructureDefinition, ValueSet,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct SdCacheKey {
    url: String,
    version: Option<String>,
}

/// A StructureDefinition with its snapshot in place.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub definition: Arc<StructureDefinition>,
    /// Problems found generating this definition's own snapshot.
    pub warnings: Vec<SnapshotWarning>,
    /// Base definition URLs, nearest first.
    pub base_chain: Vec<String>,
    /// Definitions whose snapshots were unfolded into this one.
    pub unfolded_types: Vec<String>,
}

impl ResolvedProfile {
    pub fn elements(&self) -> &[ElementDefinition] {
        self.definition.snapshot_elements().unwrap_or(&[])
    }

    /// Whether this snapshot was built from the definition at `url`.
    pub fn depends_on(&self, url: &str) -> bool {
        self.definition.url == url
            || self.base_chain.iter().any(|u| u == url)
            || self.unfolded_types.iter().any(|u| u == url)
    }
}

/// A [`FhirContext`] wrapper whose StructureDefinitions always carry a
/// snapshot.
///
/// Snapshots missing from a definition are generated from its differential
/// on first use, recursively through the `baseDefinition` chain, and
/// memoized by `(url, version)`. A chain that revisits a URL fails with
/// [`Error::CycleDetected`] instead of recursing.
///
/// [`invalidate`](Self::invalidate) drops a definition and every memoized
/// snapshot built on it; call it when the underlying context changes.
pub struct ExpandedFhirContext<C: FhirContext> {
    inner: C,
    resolved: RwLock<HashMap<SdCacheKey, Arc<ResolvedProfile>>>,
}

impl<C: FhirContext> ExpandedFhirContext<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Resolve the definition at `url` (optionally an exact `version`).
    pub fn resolve(&self, url: &str, version: Option<&str>) -> Result<Arc<ResolvedProfile>> {
        self.resolve_with_stack(url, version, &[])
    }

    /// Resolve a canonical that may carry a `|version` suffix.
    pub fn resolve_canonical(&self, canonical: &str) -> Result<Arc<ResolvedProfile>> {
        let (url, version) = split_canonical(canonical);
        self.resolve(url, version)
    }

    /// Generate the snapshot of a definition that is not (necessarily) in
    /// the context. The result is not memoized.
    pub fn compute_snapshot(&self, definition: &StructureDefinition) -> Result<ResolvedProfile> {
        self.build(Arc::new(definition.clone()), &[definition.url.clone()])
    }

    /// Drop memoized snapshots of `url` and of everything built on it.
    /// Returns the number of entries evicted.
    pub fn invalidate(&self, url: &str) -> usize {
        let Ok(mut resolved) = self.resolved.write() else {
            return 0;
        };
        let before = resolved.len();
        resolved.retain(|_, profile| !profile.depends_on(url));
        let evicted = before - resolved.len();
        if evicted > 0 {
            debug!(url = %url, evicted, "evicted memoized snapshots");
        }
        evicted
    }

    pub fn clear(&self) {
        if let Ok(mut resolved) = self.resolved.write() {
            resolved.clear();
        }
    }

    /// Number of memoized snapshots.
    pub fn len(&self) -> usize {
        self.resolved.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve_with_stack(
        &self,
        url: &str,
        version: Option<&str>,
        stack: &[String],
    ) -> Result<Arc<ResolvedProfile>> {
        if stack.iter().any(|visited| visited == url) {
            let mut chain = stack.to_vec();
            chain.push(url.to_string());
            return Err(Error::CycleDetected { chain });
        }

        let definition = self
            .inner
            .structure_definition(url, version)
            .ok_or_else(|| Error::NotFound(canonical(url, version)))?;

        let key = SdCacheKey {
            url: definition.url.clone(),
            version: definition.version.clone(),
        };
        if let Some(hit) = self.resolved.read().ok().and_then(|r| r.get(&key).cloned()) {
            return Ok(hit);
        }

        let mut next = stack.to_vec();
        next.push(url.to_string());
        let resolved = Arc::new(self.build(definition, &next)?);
        if !resolved.warnings.is_empty() {
            warn!(
                url = %url,
                warnings = resolved.warnings.len(),
                "snapshot generated with warnings"
            );
        }
        if let Ok(mut cache) = self.resolved.write() {
            cache.insert(key, Arc::clone(&resolved));
        }
        Ok(resolved)
    }

    /// `stack` already contains the definition's own URL.
    fn build(&self, definition: Arc<StructureDefinition>, stack: &[String]) -> Result<ResolvedProfile> {
        if definition.snapshot_elements().is_some() {
            return Ok(ResolvedProfile {
                definition,
                warnings: Vec::new(),
                base_chain: Vec::new(),
                unfolded_types: Vec::new(),
            });
        }

        let base_canonical = definition
            .base_definition
            .as_deref()
            .ok_or_else(|| Error::NothingToGenerate {
                url: definition.url.clone(),
            })?;
        let (base_url, base_version) = split_canonical(base_canonical);
        let base = self
            .resolve_with_stack(base_url, base_version, stack)
            .map_err(|err| match err {
                Error::NotFound(_) => Error::BaseNotFound {
                    url: definition.url.clone(),
                    base: base_canonical.to_string(),
                },
                other => other,
            })?;
        let Some(base_snapshot) = base.definition.snapshot.as_ref() else {
            return Err(Error::Snapshot(format!(
                "base {base_canonical} of {} resolved without a snapshot",
                definition.url
            )));
        };

        let unfolded = RefCell::new(Vec::new());
        let types = |element_type: &ElementDefinitionType| {
            let url = element_type
                .profiles()
                .first()
                .cloned()
                .unwrap_or_else(|| type_definition_url(&element_type.code));
            let (type_url, type_version) = split_canonical(&url);
            match self.resolve_with_stack(type_url, type_version, stack) {
                Ok(resolved) => {
                    unfolded.borrow_mut().push(resolved.definition.url.clone());
                    Some(resolved.elements().to_vec())
                }
                Err(err) => {
                    debug!(url = %url, error = %err, "type not unfolded");
                    None
                }
            }
        };

        let differential = definition.differential.clone().unwrap_or_default();
        let generated = generate_snapshot(base_snapshot, &differential, &types);

        let mut base_chain = vec![base.definition.url.clone()];
        base_chain.extend(base.base_chain.iter().cloned());

        let mut materialized = (*definition).clone();
        materialized.snapshot = Some(generated.snapshot);
        debug!(url = %definition.url, base = %base_canonical, "generated snapshot");

        Ok(ResolvedProfile {
            definition: Arc::new(materialized),
            warnings: generated.warnings,
            base_chain,
            unfolded_types: unfolded.into_inner(),
        })
    }
}

fn canonical(url: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{url}|{v}"),
        None => url.to_string(),
    }
}

impl<C: FhirContext> FhirContext for ExpandedFhirContext<C> {
    fn structure_definition(
        &self,
        url: &str,
        version: Option<&str>,
    ) -> Option<Arc<StructureDefinition>> {
        match self.resolve(url, version) {
            Ok(resolved) => Some(Arc::clone(&resolved.definition)),
            Err(Error::NotFound(_)) => None,
            Err(err) => {
                warn!(url = %url, error = %err, "could not generate snapshot");
                self.inner.structure_definition(url, version)
            }
        }
    }

    fn value_set(&self, url: &str, version: Option<&str>) -> Option<Arc<ValueSet>> {
        self.inner.value_set(url, version)
    }

    fn code_system(&self, url: &str, version: Option<&str>) -> Option<Arc<CodeSystem>> {
        self.inner.code_system(url, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct MockContext {
        by_url: RwLock<HashMap<String, Arc<StructureDefinition>>>,
    }

    impl MockContext {
        fn with(definitions: Vec<Value>) -> Self {
            let context = Self::default();
            for definition in definitions {
                context.put(definition);
            }
            context
        }

        fn put(&self, definition: Value) {
            let sd = StructureDefinition::from_value(&definition).unwrap();
            self.by_url
                .write()
                .unwrap()
                .insert(sd.url.clone(), Arc::new(sd));
        }
    }

    impl FhirContext for MockContext {
        fn structure_definition(
            &self,
            url: &str,
            _version: Option<&str>,
        ) -> Option<Arc<StructureDefinition>> {
            self.by_url.read().unwrap().get(url).cloned()
        }

        fn value_set(&self, _url: &str, _version: Option<&str>) -> Option<Arc<ValueSet>> {
            None
        }

        fn code_system(&self, _url: &str, _version: Option<&str>) -> Option<Arc<CodeSystem>> {
            None
        }
    }

    fn human_name() -> Value {
        json!({
            "resourceType": "StructureDefinition",
            "url": "http://hl7.org/fhir/StructureDefinition/HumanName",
            "name": "HumanName",
            "kind": "complex-type",
            "type": "HumanName",
            "snapshot": {"element": [
                {"id": "HumanName", "path": "HumanName"},
                {"id": "HumanName.family", "path": "HumanName.family", "min": 0, "max": "1", "type": [{"code": "string"}]}
            ]}
        })
    }

    fn patient() -> Value {
        json!({
            "resourceType": "StructureDefinition",
            "url": "http://hl7.org/fhir/StructureDefinition/Patient",
            "name": "Patient",
            "kind": "resource",
            "type": "Patient",
            "snapshot": {"element": [
                {"id": "Patient", "path": "Patient"},
                {"id": "Patient.name", "path": "Patient.name", "min": 0, "max": "*", "type": [{"code": "HumanName"}]}
            ]}
        })
    }

    fn profile(url: &str, base: &str, diff: Value) -> Value {
        json!({
            "resourceType": "StructureDefinition",
            "url": url,
            "name": "Profile",
            "kind": "resource",
            "type": "Patient",
            "derivation": "constraint",
            "baseDefinition": base,
            "differential": {"element": diff}
        })
    }

    #[test]
    fn materializes_through_base_chain_and_types() {
        let context = ExpandedFhirContext::new(MockContext::with(vec![
            human_name(),
            patient(),
            profile(
                "http://example.org/A",
                "http://hl7.org/fhir/StructureDefinition/Patient",
                json!([{"id": "Patient.name", "path": "Patient.name", "min": 1}]),
            ),
            profile(
                "http://example.org/B",
                "http://example.org/A",
                json!([{"id": "Patient.name.family", "path": "Patient.name.family", "min": 1}]),
            ),
        ]));

        let resolved = context.resolve("http://example.org/B", None).unwrap();
        let snapshot = resolved.definition.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.get_element("Patient.name").unwrap().min, Some(1));
        assert_eq!(snapshot.get_element("Patient.name.family").unwrap().min, Some(1));
        assert_eq!(
            resolved.base_chain,
            vec![
                "http://example.org/A",
                "http://hl7.org/fhir/StructureDefinition/Patient"
            ]
        );
        assert!(resolved.depends_on("http://hl7.org/fhir/StructureDefinition/HumanName"));

        let again = context.resolve("http://example.org/B", None).unwrap();
        assert!(Arc::ptr_eq(&resolved, &again));
        assert!(context
            .structure_definition("http://example.org/B", None)
            .unwrap()
            .snapshot
            .is_some());
    }

    #[test]
    fn missing_base_is_reported() {
        let context = ExpandedFhirContext::new(MockContext::with(vec![profile(
            "http://example.org/A",
            "http://example.org/missing",
            json!([]),
        )]));

        let err = context.resolve("http://example.org/A", None).unwrap_err();
        assert_eq!(
            err,
            Error::BaseNotFound {
                url: "http://example.org/A".to_string(),
                base: "http://example.org/missing".to_string(),
            }
        );
        assert!(context.is_empty());
    }

    #[test]
    fn base_cycles_are_detected() {
        let context = ExpandedFhirContext::new(MockContext::with(vec![
            profile("http://example.org/A", "http://example.org/B", json!([])),
            profile("http://example.org/B", "http://example.org/A", json!([])),
        ]));

        match context.resolve("http://example.org/A", None) {
            Err(Error::CycleDetected { chain }) => assert_eq!(
                chain,
                vec![
                    "http://example.org/A",
                    "http://example.org/B",
                    "http://example.org/A"
                ]
            ),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn invalidation_evicts_dependents() {
        let context = ExpandedFhirContext::new(MockContext::with(vec![
            patient(),
            profile(
                "http://example.org/A",
                "http://hl7.org/fhir/StructureDefinition/Patient",
                json!([{"id": "Patient.name", "path": "Patient.name", "min": 1}]),
            ),
            profile("http://example.org/B", "http://example.org/A", json!([])),
        ]));
        context.resolve("http://example.org/B", None).unwrap();
        assert_eq!(context.len(), 3);

        context.inner().put(profile(
            "http://example.org/A",
            "http://hl7.org/fhir/StructureDefinition/Patient",
            json!([{"id": "Patient.name", "path": "Patient.name", "min": 2}]),
        ));
        assert_eq!(context.invalidate("http://example.org/A"), 2);

        let resolved = context.resolve("http://example.org/B", None).unwrap();
        let name = resolved.elements().iter().find(|e| e.path == "Patient.name").unwrap();
        assert_eq!(name.min, Some(2));
    }
}
