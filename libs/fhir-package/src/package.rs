//! Loaded FHIR packages and the readers that produce them.

use crate::error::{PackageError, PackageResult};
use crate::manifest::{PackageIndex, PackageManifest};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

const MANIFEST_FILE: &str = "package.json";
const INDEX_FILE: &str = ".index.json";

/// Version given to packages assembled from a folder without a manifest.
pub const LOCAL_VERSION: &str = "0.0.0-local";

/// Resource types the validator indexes from a package.
pub const DEFINITION_TYPES: &[&str] = &["StructureDefinition", "ValueSet", "CodeSystem"];

/// Where a package came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PackageSource {
    Directory { path: PathBuf },
    Archive { path: PathBuf },
    Url { url: String },
    Registry { registry: String },
    Cache { path: PathBuf },
    Memory,
}

impl std::fmt::Display for PackageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageSource::Directory { path } => write!(f, "directory {}", path.display()),
            PackageSource::Archive { path } => write!(f, "archive {}", path.display()),
            PackageSource::Url { url } => write!(f, "url {url}"),
            PackageSource::Registry { registry } => write!(f, "registry {registry}"),
            PackageSource::Cache { path } => write!(f, "cache {}", path.display()),
            PackageSource::Memory => f.write_str("memory"),
        }
    }
}

/// Loaded FHIR package with manifest, optional index, and resources.
///
/// Resources from `package/` are kept apart from `package/examples/`; only the
/// former are conformance content. Lookups by canonical URL and type go
/// through positional indices into `resources`.
#[derive(Debug, Clone)]
pub struct FhirPackage {
    pub manifest: PackageManifest,
    pub index: Option<PackageIndex>,
    pub resources: Vec<Value>,
    pub examples: Vec<Value>,
    pub source: PackageSource,

    by_url: HashMap<String, usize>,
    by_type: HashMap<String, Vec<usize>>,
}

impl FhirPackage {
    pub fn new(manifest: PackageManifest, resources: Vec<Value>, examples: Vec<Value>) -> Self {
        let mut package = Self {
            manifest,
            index: None,
            resources,
            examples,
            source: PackageSource::Memory,
            by_url: HashMap::new(),
            by_type: HashMap::new(),
        };
        package.build_indices();
        package
    }

    pub fn with_source(mut self, source: PackageSource) -> Self {
        self.source = source;
        self
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Load package from a tar.gz reader.
    pub fn from_tar_gz<R: Read>(reader: R) -> PackageResult<Self> {
        let mut archive = Archive::new(GzDecoder::new(reader));
        let mut files: HashMap<String, Vec<u8>> = HashMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path()?.to_string_lossy().replace('\\', "/");
            let path = path.trim_start_matches("./").to_string();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            files.insert(path, contents);
        }

        let manifest_path = format!("package/{MANIFEST_FILE}");
        let manifest: PackageManifest = files
            .get(&manifest_path)
            .ok_or_else(|| PackageError::MissingFile(manifest_path.clone()))
            .and_then(|bytes| parse_json(&manifest_path, bytes))?;

        let index_path = format!("package/{INDEX_FILE}");
        let index = files
            .get(&index_path)
            .and_then(|bytes| parse_json::<PackageIndex>(&index_path, bytes).ok());

        let mut resources = Vec::new();
        let mut examples = Vec::new();
        let mut names: Vec<&String> = files.keys().collect();
        names.sort();
        for name in names {
            let Some(relative) = name.strip_prefix("package/") else {
                continue;
            };
            if !relative.ends_with(".json") || relative == MANIFEST_FILE || relative == INDEX_FILE
            {
                continue;
            }
            let target = match relative.split_once('/') {
                None => &mut resources,
                Some(("examples", rest)) if !rest.contains('/') => &mut examples,
                Some(_) => continue,
            };
            if let Some(resource) = parse_resource(name, &files[name])? {
                target.push(resource);
            }
        }

        debug!(
            package = %manifest.name,
            version = %manifest.version,
            resources = resources.len(),
            "read package archive"
        );

        let mut package = Self::new(manifest, resources, examples);
        package.index = index;
        Ok(package)
    }

    /// Load package from tar.gz bytes.
    pub fn from_tar_gz_bytes(bytes: &[u8]) -> PackageResult<Self> {
        Self::from_tar_gz(std::io::Cursor::new(bytes))
    }

    /// Extract a tar.gz package into `dest`, keeping the archive layout
    /// (`dest/package/package.json`). Entries escaping `dest` are skipped.
    pub fn unpack_tar_gz(bytes: &[u8], dest: &Path) -> PackageResult<()> {
        fs::create_dir_all(dest)?;
        let mut archive = Archive::new(GzDecoder::new(std::io::Cursor::new(bytes)));
        for entry in archive.entries()? {
            let mut entry = entry?;
            entry.unpack_in(dest)?;
        }
        Ok(())
    }

    /// Load package from a directory.
    ///
    /// Accepts the package folder itself (holding `package.json`), its parent
    /// (holding `package/package.json`), or a plain folder of definition files,
    /// which gets a synthesized manifest named after the folder.
    pub fn from_directory(dir: &Path) -> PackageResult<Self> {
        if dir.join(MANIFEST_FILE).is_file() {
            return Self::from_package_dir(dir);
        }
        let nested = dir.join("package");
        if nested.join(MANIFEST_FILE).is_file() {
            return Self::from_package_dir(&nested);
        }
        if !dir.is_dir() {
            return Err(PackageError::MissingFile(dir.display().to_string()));
        }

        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("local")
            .to_string();
        let resources = load_resources_from_dir(dir, &[])?;
        debug!(package = %name, resources = resources.len(), "read loose definition folder");
        Ok(Self::new(
            PackageManifest::synthesized(name, LOCAL_VERSION),
            resources,
            Vec::new(),
        ))
    }

    fn from_package_dir(dir: &Path) -> PackageResult<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest: PackageManifest =
            parse_json(&manifest_path.display().to_string(), &fs::read(&manifest_path)?)?;

        let index_path = dir.join(INDEX_FILE);
        let index = fs::read(&index_path)
            .ok()
            .and_then(|bytes| parse_json::<PackageIndex>(INDEX_FILE, &bytes).ok());

        let resources = load_resources_from_dir(dir, &[MANIFEST_FILE, INDEX_FILE])?;
        let examples_dir = dir.join("examples");
        let examples = if examples_dir.is_dir() {
            load_resources_from_dir(&examples_dir, &[])?
        } else {
            Vec::new()
        };

        let mut package = Self::new(manifest, resources, examples);
        package.index = index;
        Ok(package)
    }

    /// Conformance resources the validator indexes (StructureDefinition,
    /// ValueSet, CodeSystem).
    pub fn definitions(&self) -> impl Iterator<Item = &Value> {
        self.resources.iter().filter(|r| {
            r.get("resourceType")
                .and_then(Value::as_str)
                .is_some_and(|t| DEFINITION_TYPES.contains(&t))
        })
    }

    pub fn resource_by_url(&self, url: &str) -> Option<&Value> {
        self.by_url.get(url).map(|&i| &self.resources[i])
    }

    pub fn resources_of_type(&self, resource_type: &str) -> Vec<&Value> {
        self.by_type
            .get(resource_type)
            .map(|idx| idx.iter().map(|&i| &self.resources[i]).collect())
            .unwrap_or_default()
    }

    /// Declared dependencies as `(name, version reference)` pairs, by name.
    pub fn dependencies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.manifest
            .dependencies
            .iter()
            .map(|(name, version)| (name.as_str(), version.as_str()))
    }

    fn build_indices(&mut self) {
        self.by_url.clear();
        self.by_type.clear();
        for (i, resource) in self.resources.iter().enumerate() {
            let Some(resource_type) = resource.get("resourceType").and_then(Value::as_str) else {
                continue;
            };
            self.by_type
                .entry(resource_type.to_string())
                .or_default()
                .push(i);
            if let Some(url) = resource.get("url").and_then(Value::as_str) {
                self.by_url.insert(url.to_string(), i);
            }
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(file: &str, bytes: &[u8]) -> PackageResult<T> {
    let cleaned = clean_bytes(bytes)?;
    serde_json::from_str(&cleaned).map_err(|source| PackageError::Json {
        file: file.to_string(),
        source,
    })
}

/// Parse a file as a FHIR resource; JSON without `resourceType` is skipped.
fn parse_resource(file: &str, bytes: &[u8]) -> PackageResult<Option<Value>> {
    let value: Value = parse_json(file, bytes)?;
    if value.get("resourceType").and_then(Value::as_str).is_some() {
        Ok(Some(value))
    } else {
        Ok(None)
    }
}

fn load_resources_from_dir(dir: &Path, exclude: &[&str]) -> PackageResult<Vec<Value>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension() == Some("json".as_ref()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !exclude.contains(&n))
        })
        .collect();
    paths.sort();

    let mut resources = Vec::new();
    for path in paths {
        if let Some(resource) = parse_resource(&path.display().to_string(), &fs::read(&path)?)? {
            resources.push(resource);
        }
    }
    Ok(resources)
}

/// Strip a UTF-8 BOM and control characters some publishers leave behind.
fn clean_bytes(bytes: &[u8]) -> PackageResult<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let content = std::str::from_utf8(bytes)
        .map_err(|e| PackageError::InvalidStructure(format!("Invalid UTF-8: {}", e)))?;

    Ok(content
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\x7F'))
        .collect::<String>()
        .trim()
        .to_string())
}
