//! Version-addressed on-disk package cache.
//!
//! Layout follows the shared FHIR package cache used by other tooling:
//!
//! ```text
//! {root}/{name}#{version}/package/package.json
//! {root}/{name}#{version}/package/StructureDefinition-*.json
//! {root}/{name}#{version}/vigil-cache.json
//! ```
//!
//! Cache hits are trusted as-is; entries are not re-hashed on read.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vigil_package::{FhirPackage, PackageSource};

const METADATA_FILE: &str = "vigil-cache.json";
const TMP_PREFIX: &str = ".tmp-";

/// Metadata recorded next to each cached package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub name: String,
    pub version: String,
    pub source: PackageSource,
    /// Files under `package/`, relative and sorted.
    pub files: Vec<String>,
    pub cached_at: DateTime<Utc>,
}

/// Storage for downloaded packages.
pub trait PackageCache: Send + Sync {
    /// Load a cached package, `None` on a miss.
    fn get(&self, name: &str, version: &str) -> Result<Option<FhirPackage>>;

    fn contains(&self, name: &str, version: &str) -> bool;

    /// Versions of `name` present in the cache.
    fn versions(&self, name: &str) -> Result<Vec<String>>;

    /// Unpack a tar.gz into the cache, replacing any existing entry.
    fn store_archive(
        &self,
        name: &str,
        version: &str,
        archive: &[u8],
        source: &PackageSource,
    ) -> Result<CacheEntry>;

    fn list(&self) -> Result<Vec<CacheEntry>>;

    /// Remove an entry; returns whether it existed.
    fn remove(&self, name: &str, version: &str) -> Result<bool>;
}

/// [`PackageCache`] backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FileSystemCache {
    root: PathBuf,
}

impl FileSystemCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.fhir/packages`, or a relative `.fhir/packages` when there is no
    /// home directory.
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fhir")
            .join("packages")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(entry_dir_name(name, version))
    }
}

impl Default for FileSystemCache {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

/// Scoped names (`@scope/name`) can't contain a path separator on disk.
fn entry_dir_name(name: &str, version: &str) -> String {
    format!("{}#{}", name.replace('/', "__"), version)
}

impl PackageCache for FileSystemCache {
    fn get(&self, name: &str, version: &str) -> Result<Option<FhirPackage>> {
        let dir = self.entry_dir(name, version);
        if !dir.join("package").join("package.json").is_file() {
            return Ok(None);
        }
        debug!(package = %name, version = %version, "package cache hit");
        let package = FhirPackage::from_directory(&dir)?.with_source(PackageSource::Cache { path: dir });
        Ok(Some(package))
    }

    fn contains(&self, name: &str, version: &str) -> bool {
        self.entry_dir(name, version)
            .join("package")
            .join("package.json")
            .is_file()
    }

    fn versions(&self, name: &str) -> Result<Vec<String>> {
        let prefix = format!("{}#", name.replace('/', "__"));
        let mut versions = Vec::new();
        if !self.root.is_dir() {
            return Ok(versions);
        }
        for entry in fs::read_dir(&self.root)? {
            let file_name = entry?.file_name();
            let Some(dir_name) = file_name.to_str() else {
                continue;
            };
            if let Some(version) = dir_name.strip_prefix(&prefix) {
                if self.contains(name, version) {
                    versions.push(version.to_string());
                }
            }
        }
        versions.sort_by(|a, b| vigil_package::compare_versions(a, b));
        Ok(versions)
    }

    fn store_archive(
        &self,
        name: &str,
        version: &str,
        archive: &[u8],
        source: &PackageSource,
    ) -> Result<CacheEntry> {
        fs::create_dir_all(&self.root)?;
        let final_dir = self.entry_dir(name, version);
        let tmp_dir = self.root.join(format!(
            "{TMP_PREFIX}{}-{}",
            entry_dir_name(name, version),
            std::process::id()
        ));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }

        let unpacked = FhirPackage::unpack_tar_gz(archive, &tmp_dir)
            .map_err(Error::from)
            .and_then(|_| {
                if tmp_dir.join("package").join("package.json").is_file() {
                    Ok(())
                } else {
                    Err(Error::Package(vigil_package::PackageError::MissingFile(
                        "package/package.json".to_string(),
                    )))
                }
            });
        if let Err(err) = unpacked {
            let _ = fs::remove_dir_all(&tmp_dir);
            return Err(err);
        }

        let mut files = Vec::new();
        collect_files(&tmp_dir.join("package"), Path::new(""), &mut files)?;
        files.sort();

        let entry = CacheEntry {
            name: name.to_string(),
            version: version.to_string(),
            source: source.clone(),
            files,
            cached_at: Utc::now(),
        };
        fs::write(
            tmp_dir.join(METADATA_FILE),
            serde_json::to_vec_pretty(&entry)?,
        )?;

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&tmp_dir, &final_dir)?;
        debug!(package = %name, version = %version, files = entry.files.len(), "stored package in cache");
        Ok(entry)
    }

    fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        if !self.root.is_dir() {
            return Ok(entries);
        }
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if dir_name.starts_with(TMP_PREFIX) || !path.join("package").is_dir() {
                continue;
            }
            match fs::read(path.join(METADATA_FILE)) {
                Ok(bytes) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                    Ok(entry) => entries.push(entry),
                    Err(err) => warn!(entry = %dir_name, error = %err, "unreadable cache metadata"),
                },
                // Entries written by other tools carry no metadata file.
                Err(_) => {
                    if let Some((name, version)) = dir_name.split_once('#') {
                        let mut files = Vec::new();
                        collect_files(&path.join("package"), Path::new(""), &mut files)?;
                        files.sort();
                        entries.push(CacheEntry {
                            name: name.replace("__", "/"),
                            version: version.to_string(),
                            source: PackageSource::Cache { path: path.clone() },
                            files,
                            cached_at: fs::metadata(&path)?
                                .modified()
                                .map(DateTime::<Utc>::from)
                                .unwrap_or_else(|_| Utc::now()),
                        });
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        Ok(entries)
    }

    fn remove(&self, name: &str, version: &str) -> Result<bool> {
        let dir = self.entry_dir(name, version);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn collect_files(dir: &Path, relative: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = relative.join(entry.file_name());
        if path.is_dir() {
            collect_files(&path, &rel, out)?;
        } else {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn archive(name: &str, version: &str) -> Vec<u8> {
        let manifest = format!(r#"{{"name":"{name}","version":"{version}"}}"#);
        let valueset = r#"{"resourceType":"ValueSet","url":"http://example.org/vs"}"#;
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, body) in [
            ("package/package.json", manifest.as_str()),
            ("package/ValueSet-vs.json", valueset),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn store_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileSystemCache::new(dir.path());
        assert!(cache.get("a.b", "1.0.0").unwrap().is_none());

        let entry = cache
            .store_archive(
                "a.b",
                "1.0.0",
                &archive("a.b", "1.0.0"),
                &PackageSource::Registry {
                    registry: "https://packages.example.org".to_string(),
                },
            )
            .unwrap();
        assert_eq!(entry.files, vec!["ValueSet-vs.json", "package.json"]);
        assert!(dir.path().join("a.b#1.0.0").join(METADATA_FILE).is_file());

        let package = cache.get("a.b", "1.0.0").unwrap().unwrap();
        assert_eq!(package.version(), "1.0.0");
        assert!(matches!(package.source, PackageSource::Cache { .. }));
        assert_eq!(cache.versions("a.b").unwrap(), vec!["1.0.0"]);
        assert_eq!(cache.list().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_archive_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileSystemCache::new(dir.path());
        let result = cache.store_archive("a.b", "1.0.0", b"not gzip", &PackageSource::Memory);
        assert!(result.is_err());
        assert!(!cache.contains("a.b", "1.0.0"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn remove_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileSystemCache::new(dir.path());
        cache
            .store_archive("a.b", "2.0.0", &archive("a.b", "2.0.0"), &PackageSource::Memory)
            .unwrap();
        assert!(cache.remove("a.b", "2.0.0").unwrap());
        assert!(!cache.remove("a.b", "2.0.0").unwrap());
    }
}
