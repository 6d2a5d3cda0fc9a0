//! `package.json` manifests and `.index.json` files.

use crate::error::PackageError;
use crate::version::validate_version_format;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type PackageName = String;
pub type Version = String;
pub type VersionReference = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageType {
    Conformance,
    Ig,
    Core,
    Examples,
    Group,
    Tool,
    IgTemplate,
    Unknown(String),
}

impl PackageType {
    fn as_str(&self) -> &str {
        match self {
            PackageType::Conformance => "Conformance",
            PackageType::Ig => "IG",
            PackageType::Core => "Core",
            PackageType::Examples => "Examples",
            PackageType::Group => "Group",
            PackageType::Tool => "Tool",
            PackageType::IgTemplate => "IG-Template",
            PackageType::Unknown(s) => s,
        }
    }
}

impl Serialize for PackageType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PackageType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "Conformance" | "fhir.ig" => PackageType::Conformance,
            "IG" => PackageType::Ig,
            "Core" | "fhir.core" => PackageType::Core,
            "Examples" => PackageType::Examples,
            "Group" => PackageType::Group,
            "Tool" | "fhir.tool" => PackageType::Tool,
            "IG-Template" | "fhir.template" => PackageType::IgTemplate,
            _ => PackageType::Unknown(s),
        })
    }
}

/// FHIR NPM Package manifest (`package/package.json`).
///
/// Only `name` and `version` are required; registries publish plenty of
/// packages without an author or description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: PackageName,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fhir_versions: Vec<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<PackageName, VersionReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<PackageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl PackageManifest {
    /// Minimal manifest for packages assembled from loose files.
    pub fn synthesized(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            canonical: None,
            url: None,
            title: None,
            description: None,
            fhir_versions: Vec::new(),
            dependencies: BTreeMap::new(),
            author: None,
            package_type: None,
            license: None,
            extra: Map::new(),
        }
    }

    /// Check required fields; in strict mode also the version formats.
    pub fn validate(&self, strict: bool) -> Result<(), PackageError> {
        if self.name.is_empty() {
            return Err(PackageError::ValidationError(
                "Package name required".into(),
            ));
        }
        if self.version.is_empty() {
            return Err(PackageError::ValidationError(
                "Package version required".into(),
            ));
        }

        if strict {
            validate_version_format(&self.version)?;
            for dep_version in self.dependencies.values() {
                let version_to_validate = dep_version.strip_suffix(".x").unwrap_or(dep_version);
                validate_version_format(version_to_validate)?;
            }
        }

        Ok(())
    }

    /// `name#version`, the package-cache directory name.
    pub fn package_id(&self) -> String {
        format!("{}#{}", self.name, self.version)
    }
}

/// Package index (`.index.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIndex {
    #[serde(rename = "index-version")]
    pub index_version: u8,
    pub files: Vec<IndexedFile>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// File entry in package index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub filename: String,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}
