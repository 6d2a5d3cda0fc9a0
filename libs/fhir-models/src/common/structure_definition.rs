//! FHIR StructureDefinition model
//!
//! Only the parts the validator reads are typed. Everything else is kept in
//! `extras` so a definition survives a parse/serialize cycle unchanged.

use super::element_definition::{Differential, ElementDefinition, Snapshot};
use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EXTENSION_TYPE: &str = "Extension";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Canonical identifier
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PublicationStatus>,

    pub kind: StructureDefinitionKind,

    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,

    /// Type defined or constrained by this structure
    #[serde(rename = "type")]
    pub type_: String,

    /// Definition that this type is constrained/specialized from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<TypeDerivationRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential: Option<Differential>,

    /// Additional content beyond core fields
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

fn default_resource_type() -> String {
    "StructureDefinition".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureDefinitionKind {
    PrimitiveType,
    ComplexType,
    Resource,
    Logical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeDerivationRule {
    Specialization,
    Constraint,
}

/// Publication status. Unrecognized codes are tolerated rather than
/// rejecting the whole definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Draft,
    Active,
    Retired,
    #[serde(other)]
    Unknown,
}

impl StructureDefinition {
    /// Parse from a JSON value, checking the resource type first.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value.get("resourceType").and_then(Value::as_str) {
            Some("StructureDefinition") => {}
            Some(other) => {
                return Err(Error::InvalidResource(format!(
                    "expected StructureDefinition, found {other}"
                )))
            }
            None => return Err(Error::MissingField("resourceType".to_string())),
        }
        serde_json::from_value(value.clone()).map_err(Error::from)
    }

    pub fn new(
        url: impl Into<String>,
        type_: impl Into<String>,
        kind: StructureDefinitionKind,
    ) -> Self {
        let type_ = type_.into();
        Self {
            resource_type: default_resource_type(),
            id: None,
            url: url.into(),
            version: None,
            name: type_.clone(),
            title: None,
            status: Some(PublicationStatus::Active),
            kind,
            is_abstract: false,
            type_,
            base_definition: None,
            derivation: None,
            snapshot: None,
            differential: None,
            extras: Map::new(),
        }
    }

    /// `url|version` when a version is present, otherwise the bare url.
    pub fn canonical(&self) -> String {
        match &self.version {
            Some(version) => format!("{}|{}", self.url, version),
            None => self.url.clone(),
        }
    }

    pub fn is_constraint(&self) -> bool {
        self.derivation == Some(TypeDerivationRule::Constraint)
    }

    pub fn is_extension(&self) -> bool {
        self.type_ == EXTENSION_TYPE && self.kind == StructureDefinitionKind::ComplexType
    }

    pub fn has_differential(&self) -> bool {
        self.differential
            .as_ref()
            .map(|d| !d.element.is_empty())
            .unwrap_or(false)
    }

    pub fn snapshot_elements(&self) -> Option<&[ElementDefinition]> {
        self.snapshot
            .as_ref()
            .filter(|s| !s.element.is_empty())
            .map(|s| s.element.as_slice())
    }

    pub fn differential_elements(&self) -> &[ElementDefinition] {
        self.differential
            .as_ref()
            .map(|d| d.element.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extension_definitions_are_detected() {
        let sd = StructureDefinition::from_value(&json!({
            "resourceType": "StructureDefinition",
            "url": "http://example.org/StructureDefinition/birth-place",
            "name": "BirthPlace",
            "status": "active",
            "kind": "complex-type",
            "abstract": false,
            "type": "Extension",
            "baseDefinition": "http://hl7.org/fhir/StructureDefinition/Extension",
            "derivation": "constraint",
            "context": [{"type": "element", "expression": "Patient"}]
        }))
        .unwrap();

        assert!(sd.is_extension());
        assert!(sd.is_constraint());
        assert!(sd.extras.contains_key("context"));
        assert_eq!(sd.canonical(), "http://example.org/StructureDefinition/birth-place");
    }

    #[test]
    fn rejects_other_resource_types() {
        let err = StructureDefinition::from_value(&json!({
            "resourceType": "ValueSet",
            "url": "http://example.org/vs"
        }))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidResource(_)));
    }

    #[test]
    fn unknown_status_is_tolerated() {
        let sd: StructureDefinition = serde_json::from_value(json!({
            "url": "http://example.org/sd",
            "status": "superseded",
            "kind": "resource",
            "type": "Patient"
        }))
        .unwrap();
        assert_eq!(sd.status, Some(PublicationStatus::Unknown));
        assert_eq!(sd.resource_type, "StructureDefinition");
    }
}
