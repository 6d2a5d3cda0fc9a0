//! FHIR Package Registry Client
//!
//! Async acquisition of FHIR packages from local directories, archive files,
//! HTTP URLs and npm-style package registries, with a version-addressed
//! on-disk cache.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::collections::HashSet;
//! use vigil_registry_client::{PackageReference, RegistryClient, RegistryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RegistryClient::new(RegistryConfig::default())?;
//! let reference = PackageReference::parse("hl7.fhir.us.core@6.1.0")?;
//! let packages = client.resolve(&reference, &HashSet::new()).await?;
//! println!("loaded {} packages", packages.len());
//! # Ok(())
//! # }
//! ```
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod source;
pub mod version_resolver;

pub use cache::{CacheEntry, FileSystemCache, PackageCache};
pub use client::RegistryClient;
pub use config::{RegistryConfig, DEFAULT_REGISTRY_URL};
pub use error::{Error, Result};
pub use registry::{RegistryHttpClient, RequestPolicy};
pub use source::PackageReference;
pub use version_resolver::{latest_version, select_version, VersionListing};

pub use vigil_package::{FhirPackage, PackageSource};
