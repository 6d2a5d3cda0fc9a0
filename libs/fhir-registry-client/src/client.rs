//! Package acquisition: turns a [`PackageReference`] into loaded packages.

use crate::cache::{FileSystemCache, PackageCache};
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::registry::RegistryHttpClient;
use crate::source::PackageReference;
use crate::version_resolver::{latest_version, select_version, VersionListing};
use std::collections::{HashSet, VecDeque};
use std::fs;
use tracing::{debug, info, warn};
use vigil_package::{compare_versions, FhirPackage, PackageSource};

/// Resolves package references against local paths, URLs, a registry and
/// an on-disk cache.
pub struct RegistryClient<C: PackageCache = FileSystemCache> {
    config: RegistryConfig,
    http: RegistryHttpClient,
    cache: C,
}

impl RegistryClient<FileSystemCache> {
    /// Client with a [`FileSystemCache`] at the configured (or default) root.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let cache = match &config.cache_dir {
            Some(dir) => FileSystemCache::new(dir),
            None => FileSystemCache::default(),
        };
        Self::with_cache(config, cache)
    }
}

impl<C: PackageCache> RegistryClient<C> {
    pub fn with_cache(config: RegistryConfig, cache: C) -> Result<Self> {
        let http = RegistryHttpClient::new(&config.registry_url, config.request_policy())?;
        Ok(Self {
            config,
            http,
            cache,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Acquire the referenced package and, when enabled, its dependencies.
    ///
    /// The root package comes first, dependencies follow in discovery order.
    /// Dependencies whose name is in `skip` (already loaded) are not fetched.
    pub async fn resolve(
        &self,
        reference: &PackageReference,
        skip: &HashSet<String>,
    ) -> Result<Vec<FhirPackage>> {
        let root = self.acquire(reference).await?;
        info!(
            package = %root.name(),
            version = %root.version(),
            source = %root.source,
            "acquired package"
        );

        let mut packages = vec![root];
        if self.config.load_dependencies {
            self.resolve_dependencies(&mut packages, skip).await;
        }
        Ok(packages)
    }

    async fn resolve_dependencies(&self, packages: &mut Vec<FhirPackage>, skip: &HashSet<String>) {
        let mut seen: HashSet<String> = packages.iter().map(|p| p.name().to_string()).collect();
        let mut queue: VecDeque<(String, String)> = packages[0]
            .dependencies()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();

        while let Some((name, version_ref)) = queue.pop_front() {
            if skip.contains(&name) || !seen.insert(name.clone()) {
                debug!(package = %name, "dependency already loaded");
                continue;
            }
            match self.acquire_from_registry(&name, Some(&version_ref)).await {
                Ok(dependency) => {
                    queue.extend(
                        dependency
                            .dependencies()
                            .map(|(n, v)| (n.to_string(), v.to_string())),
                    );
                    packages.push(dependency);
                }
                Err(err) => {
                    warn!(package = %name, version = %version_ref, error = %err, "could not load dependency");
                }
            }
        }
    }

    /// Acquire a single package without dependencies.
    pub async fn acquire(&self, reference: &PackageReference) -> Result<FhirPackage> {
        match reference {
            PackageReference::Directory(path) => {
                if !path.is_dir() {
                    return Err(Error::unreachable(path.display().to_string(), "not a directory"));
                }
                let package = FhirPackage::from_directory(path)?;
                Ok(package.with_source(PackageSource::Directory { path: path.clone() }))
            }
            PackageReference::Archive(path) => {
                let bytes = fs::read(path)
                    .map_err(|e| Error::unreachable(path.display().to_string(), e))?;
                let package = FhirPackage::from_tar_gz_bytes(&bytes)?;
                Ok(package.with_source(PackageSource::Archive { path: path.clone() }))
            }
            PackageReference::Url(url) => {
                let bytes = self.http.fetch(url).await?;
                let package = FhirPackage::from_tar_gz_bytes(&bytes)?;
                let source = PackageSource::Url { url: url.clone() };
                self.store(package.name(), package.version(), &bytes, &source);
                Ok(package.with_source(source))
            }
            PackageReference::Registry { name, version } => {
                self.acquire_from_registry(name, version.as_deref()).await
            }
        }
    }

    /// Load `name` at the version selected by `version_ref`, from the cache
    /// when possible.
    pub async fn acquire_from_registry(
        &self,
        name: &str,
        version_ref: Option<&str>,
    ) -> Result<FhirPackage> {
        if let Some(exact) = version_ref.filter(|v| is_exact(v)) {
            if let Some(package) = self.cached(name, exact)? {
                return Ok(package);
            }
            return self.download(name, exact).await;
        }

        let version = match self.http.list_versions(name).await {
            Ok(listing) => choose(&listing, version_ref).ok_or_else(|| Error::PackageNotFound {
                name: name.to_string(),
                version: version_ref.unwrap_or("latest").to_string(),
            })?,
            Err(Error::SourceUnreachable { location, reason }) => {
                // Offline: settle for what the cache holds.
                let cached = if self.config.cache_packages {
                    self.cache.versions(name)?
                } else {
                    Vec::new()
                };
                match select_version(&cached, version_ref) {
                    Some(version) => {
                        warn!(package = %name, version = %version, "registry unreachable, using cached version");
                        version
                    }
                    None => return Err(Error::SourceUnreachable { location, reason }),
                }
            }
            Err(err) => return Err(err),
        };

        if let Some(package) = self.cached(name, &version)? {
            return Ok(package);
        }
        self.download(name, &version).await
    }

    /// All versions the registry knows for `name`, oldest first.
    pub async fn list_package_versions(&self, name: &str) -> Result<Vec<String>> {
        let mut versions = self.http.list_versions(name).await?.versions;
        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }

    /// Newest published version of `name`.
    pub async fn get_latest_package_version(&self, name: &str) -> Result<String> {
        let listing = self.http.list_versions(name).await?;
        latest_version(&listing).ok_or_else(|| Error::PackageNotFound {
            name: name.to_string(),
            version: "latest".to_string(),
        })
    }

    /// Cached package or download, for callers that already know the version.
    pub async fn load_or_download_package(&self, name: &str, version: &str) -> Result<FhirPackage> {
        self.acquire_from_registry(name, Some(version)).await
    }

    fn cached(&self, name: &str, version: &str) -> Result<Option<FhirPackage>> {
        if !self.config.cache_packages {
            return Ok(None);
        }
        self.cache.get(name, version)
    }

    async fn download(&self, name: &str, version: &str) -> Result<FhirPackage> {
        info!(package = %name, version = %version, registry = %self.http.base_url(), "downloading package");
        let bytes = self.http.download(name, version).await?;
        let package = FhirPackage::from_tar_gz_bytes(&bytes)?;
        let source = PackageSource::Registry {
            registry: self.http.base_url().to_string(),
        };
        self.store(name, version, &bytes, &source);
        Ok(package.with_source(source))
    }

    /// Cache write failures don't fail the load; the package is in memory.
    fn store(&self, name: &str, version: &str, bytes: &[u8], source: &PackageSource) {
        if !self.config.cache_packages {
            return;
        }
        if let Err(err) = self.cache.store_archive(name, version, bytes, source) {
            warn!(package = %name, version = %version, error = %err, "failed to cache package");
        }
    }
}

fn choose(listing: &VersionListing, version_ref: Option<&str>) -> Option<String> {
    match version_ref {
        None => latest_version(listing),
        Some(reference) => select_version(&listing.versions, Some(reference)),
    }
}

/// A version reference that names one version (no wildcard or keyword).
fn is_exact(version: &str) -> bool {
    let keyword = matches!(version, "latest" | "current" | "dev");
    let major_minor = version.split('.').count() == 2 && !version.contains('-');
    !keyword && !version.ends_with(".x") && !major_minor
}
