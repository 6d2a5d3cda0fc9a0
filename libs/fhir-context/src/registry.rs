//! In-memory index of loaded definitions.

use crate::context::FhirContext;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};
use vigil_models::{CodeSystem, StructureDefinition, ValueSet};
use vigil_package::{FhirPackage, PackageSource};

/// What happens when a definition with an already-loaded `url|version`
/// arrives again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// The later definition shadows the earlier one.
    #[default]
    LastWins,
    /// The whole ingest fails and nothing is registered.
    Reject,
}

/// A package whose definitions were ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedPackage {
    pub name: String,
    pub version: String,
    pub source: PackageSource,
    pub resource_count: usize,
}

/// Outcome of one [`DefinitionRegistry::ingest`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Definitions registered.
    pub count: usize,
    /// Canonicals (`url` or `url|version`) that shadowed an earlier entry.
    pub replaced: Vec<String>,
    /// URLs that already had entries at other versions; their unversioned
    /// lookup now resolves to the new entry.
    pub superseded: Vec<String>,
    /// Files that looked like definitions but failed to parse.
    pub skipped: Vec<String>,
    pub packages: Vec<LoadedPackage>,
}

#[derive(Debug, Clone)]
pub enum Definition {
    Structure(Arc<StructureDefinition>),
    ValueSet(Arc<ValueSet>),
    CodeSystem(Arc<CodeSystem>),
}

impl Definition {
    fn parse(value: &Value) -> std::result::Result<Option<Self>, serde_json::Error> {
        Ok(match value.get("resourceType").and_then(Value::as_str) {
            Some("StructureDefinition") => Some(Definition::Structure(Arc::new(
                serde_json::from_value(value.clone())?,
            ))),
            Some("ValueSet") => Some(Definition::ValueSet(Arc::new(serde_json::from_value(
                value.clone(),
            )?))),
            Some("CodeSystem") => Some(Definition::CodeSystem(Arc::new(
                serde_json::from_value(value.clone())?,
            ))),
            _ => None,
        })
    }

    fn url(&self) -> &str {
        match self {
            Definition::Structure(sd) => &sd.url,
            Definition::ValueSet(vs) => &vs.url,
            Definition::CodeSystem(cs) => &cs.url,
        }
    }

    fn version(&self) -> Option<&str> {
        match self {
            Definition::Structure(sd) => sd.version.as_deref(),
            Definition::ValueSet(vs) => vs.version.as_deref(),
            Definition::CodeSystem(cs) => cs.version.as_deref(),
        }
    }

    fn kind(&self) -> Kind {
        match self {
            Definition::Structure(_) => Kind::Structure,
            Definition::ValueSet(_) => Kind::ValueSet,
            Definition::CodeSystem(_) => Kind::CodeSystem,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Structure,
    ValueSet,
    CodeSystem,
}

#[derive(Debug, Clone)]
struct Entry {
    version: Option<String>,
    definition: Definition,
    package: String,
    /// Ingest order; the highest wins unversioned lookups.
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<(Kind, String), Vec<Entry>>,
    packages: Vec<LoadedPackage>,
    seq: u64,
}

impl State {
    fn lookup(&self, kind: Kind, url: &str, version: Option<&str>) -> Option<&Entry> {
        let entries = self.entries.get(&(kind, url.to_string()))?;
        match version {
            Some(version) => entries
                .iter()
                .filter(|e| e.version.as_deref() == Some(version))
                .max_by_key(|e| e.seq),
            None => entries.iter().max_by_key(|e| e.seq),
        }
    }
}

/// Index of StructureDefinitions, ValueSets and CodeSystems across all
/// loaded packages, keyed by canonical URL and version.
///
/// Readers share the registry freely; [`ingest`](Self::ingest) takes the
/// write lock for a whole batch, so a batch is visible either completely or
/// not at all.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    state: RwLock<State>,
    policy: DuplicatePolicy,
}

impl DefinitionRegistry {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            state: RwLock::new(State::default()),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register every definition of `packages`.
    ///
    /// Definitions are parsed before the registry is touched; unparseable
    /// ones are skipped and reported. Under [`DuplicatePolicy::Reject`] a
    /// repeated `url|version` fails the call and leaves the registry as it
    /// was.
    pub fn ingest(&self, packages: &[FhirPackage]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut parsed: Vec<(Definition, String)> = Vec::new();

        for package in packages {
            let package_id = package.manifest.package_id();
            let mut resource_count = 0;
            for value in package.definitions() {
                match Definition::parse(value) {
                    Ok(Some(definition)) => {
                        resource_count += 1;
                        parsed.push((definition, package_id.clone()));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let url = value
                            .get("url")
                            .and_then(Value::as_str)
                            .unwrap_or("<no url>")
                            .to_string();
                        warn!(package = %package_id, url = %url, error = %err, "skipping unparseable definition");
                        report.skipped.push(url);
                    }
                }
            }
            report.packages.push(LoadedPackage {
                name: package.name().to_string(),
                version: package.version().to_string(),
                source: package.source.clone(),
                resource_count,
            });
        }

        let mut state = self.write();

        if self.policy == DuplicatePolicy::Reject {
            let mut batch: HashMap<(Kind, &str, Option<&str>), &str> = HashMap::new();
            for (definition, package_id) in &parsed {
                let key = (definition.kind(), definition.url(), definition.version());
                let existing = state
                    .entries
                    .get(&(key.0, key.1.to_string()))
                    .and_then(|entries| entries.iter().find(|e| e.version.as_deref() == key.2))
                    .map(|e| e.package.as_str())
                    .or_else(|| batch.get(&key).copied());
                if let Some(existing) = existing {
                    return Err(Error::DuplicateDefinition {
                        canonical: canonical(definition.url(), definition.version()),
                        existing: existing.to_string(),
                        incoming: package_id.clone(),
                    });
                }
                batch.insert(key, package_id);
            }
        }

        for (definition, package_id) in parsed {
            state.seq += 1;
            let seq = state.seq;
            let version = definition.version().map(str::to_string);
            let key = (definition.kind(), definition.url().to_string());
            let entries = state.entries.entry(key).or_default();

            let replaced_at = entries.iter().position(|e| e.version == version);
            if replaced_at.is_none() && !entries.is_empty() {
                report.superseded.push(definition.url().to_string());
            }
            if let Some(pos) = replaced_at {
                debug!(url = %definition.url(), from = %entries[pos].package, to = %package_id, "definition shadowed");
                report
                    .replaced
                    .push(canonical(definition.url(), version.as_deref()));
            }
            let entry = Entry {
                version,
                definition,
                package: package_id,
                seq,
            };
            match replaced_at {
                Some(pos) => entries[pos] = entry,
                None => entries.push(entry),
            }
            report.count += 1;
        }

        for package in &report.packages {
            state
                .packages
                .retain(|p| !(p.name == package.name && p.version == package.version));
            state.packages.push(package.clone());
        }

        debug!(count = report.count, replaced = report.replaced.len(), "ingested definitions");
        Ok(report)
    }

    /// Look up a StructureDefinition. With a version, only that exact
    /// version matches; without, the most recently ingested one.
    pub fn lookup(&self, url: &str, version: Option<&str>) -> Option<Arc<StructureDefinition>> {
        match self.read().lookup(Kind::Structure, url, version)?.definition {
            Definition::Structure(ref sd) => Some(Arc::clone(sd)),
            _ => None,
        }
    }

    /// Versions registered for a StructureDefinition URL, in ingest order.
    pub fn versions_of(&self, url: &str) -> Vec<Option<String>> {
        let state = self.read();
        let mut entries: Vec<&Entry> = state
            .entries
            .get(&(Kind::Structure, url.to_string()))
            .map(|e| e.iter().collect())
            .unwrap_or_default();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.version.clone()).collect()
    }

    /// Every StructureDefinition currently visible (latest per URL+version).
    pub fn structure_definitions(&self) -> Vec<Arc<StructureDefinition>> {
        let state = self.read();
        state
            .entries
            .iter()
            .filter(|((kind, _), _)| *kind == Kind::Structure)
            .flat_map(|(_, entries)| entries.iter())
            .filter_map(|e| match &e.definition {
                Definition::Structure(sd) => Some(Arc::clone(sd)),
                _ => None,
            })
            .collect()
    }

    pub fn loaded_packages(&self) -> Vec<LoadedPackage> {
        self.read().packages.clone()
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.read().packages.iter().any(|p| p.name == name)
    }

    /// Number of registered definitions of all kinds.
    pub fn len(&self) -> usize {
        self.read().entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.write() = State::default();
    }
}

fn canonical(url: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{url}|{v}"),
        None => url.to_string(),
    }
}

impl FhirContext for DefinitionRegistry {
    fn structure_definition(
        &self,
        url: &str,
        version: Option<&str>,
    ) -> Option<Arc<StructureDefinition>> {
        self.lookup(url, version)
    }

    fn value_set(&self, url: &str, version: Option<&str>) -> Option<Arc<ValueSet>> {
        match self.read().lookup(Kind::ValueSet, url, version)?.definition {
            Definition::ValueSet(ref vs) => Some(Arc::clone(vs)),
            _ => None,
        }
    }

    fn code_system(&self, url: &str, version: Option<&str>) -> Option<Arc<CodeSystem>> {
        match self.read().lookup(Kind::CodeSystem, url, version)?.definition {
            Definition::CodeSystem(ref cs) => Some(Arc::clone(cs)),
            _ => None,
        }
    }
}
