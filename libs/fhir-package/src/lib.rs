//! FHIR NPM packages.
//!
//! Reads `package.json` manifests, `.index.json` files and package content
//! from tar.gz archives or directories, and provides the version ordering
//! rules package resolution relies on.

pub mod error;
pub mod manifest;
pub mod package;
pub mod version;

pub use error::{PackageError, PackageResult};
pub use manifest::{
    IndexedFile, PackageIndex, PackageManifest, PackageName, PackageType, Version,
    VersionReference,
};
pub use package::{FhirPackage, PackageSource, DEFINITION_TYPES, LOCAL_VERSION};
pub use version::{compare_versions, split_label, validate_version_format, version_matches};
