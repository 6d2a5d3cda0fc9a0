#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use vigil_context::DefinitionRegistry;
use vigil_package::{FhirPackage, PackageManifest};

pub const CORE: &str = "http://hl7.org/fhir/StructureDefinition/";

/// Snapshot element with `base` mirroring its own cardinality.
pub fn el(path: &str, min: u32, max: &str, types: &[&str]) -> Value {
    let mut element = json!({
        "id": path,
        "path": path,
        "min": min,
        "max": max,
        "base": {"path": path, "min": min, "max": max}
    });
    if !types.is_empty() {
        element["type"] = Value::Array(types.iter().map(|t| json!({"code": t})).collect());
    }
    element
}

pub fn core_type(name: &str, kind: &str, elements: Vec<Value>) -> Value {
    let mut all = vec![el(name, 0, "*", &[])];
    all.extend(elements);
    json!({
        "resourceType": "StructureDefinition",
        "url": format!("{CORE}{name}"),
        "version": "4.0.1",
        "name": name,
        "status": "active",
        "kind": kind,
        "abstract": false,
        "type": name,
        "derivation": "specialization",
        "snapshot": {"element": all}
    })
}

pub fn profile(url: &str, type_: &str, base: &str, differential: Vec<Value>) -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": url,
        "name": url.rsplit('/').next().unwrap_or(url),
        "status": "active",
        "kind": if type_ == "Extension" { "complex-type" } else { "resource" },
        "abstract": false,
        "type": type_,
        "baseDefinition": base,
        "derivation": "constraint",
        "differential": {"element": differential}
    })
}

/// A small slice of the R4 core definitions.
pub fn core_definitions() -> Vec<Value> {
    vec![
        core_type(
            "Patient",
            "resource",
            vec![
                el("Patient.id", 0, "1", &["id"]),
                el("Patient.meta", 0, "1", &["Meta"]),
                el("Patient.extension", 0, "*", &["Extension"]),
                el("Patient.identifier", 0, "*", &["Identifier"]),
                el("Patient.active", 0, "1", &["boolean"]),
                el("Patient.name", 0, "*", &["HumanName"]),
                el("Patient.gender", 0, "1", &["code"]),
                el("Patient.birthDate", 0, "1", &["date"]),
                el("Patient.deceased[x]", 0, "1", &["boolean", "dateTime"]),
            ],
        ),
        core_type(
            "Identifier",
            "complex-type",
            vec![
                el("Identifier.extension", 0, "*", &["Extension"]),
                el("Identifier.use", 0, "1", &["code"]),
                el("Identifier.system", 0, "1", &["uri"]),
                el("Identifier.value", 0, "1", &["string"]),
            ],
        ),
        core_type(
            "HumanName",
            "complex-type",
            vec![
                el("HumanName.extension", 0, "*", &["Extension"]),
                el("HumanName.family", 0, "1", &["string"]),
                el("HumanName.given", 0, "*", &["string"]),
            ],
        ),
        core_type(
            "Meta",
            "complex-type",
            vec![el("Meta.profile", 0, "*", &["canonical"])],
        ),
        core_type(
            "Extension",
            "complex-type",
            vec![
                el("Extension.id", 0, "1", &["string"]),
                el("Extension.extension", 0, "*", &["Extension"]),
                el("Extension.url", 1, "1", &["uri"]),
                el(
                    "Extension.value[x]",
                    0,
                    "1",
                    &["string", "boolean", "code", "Coding", "CodeableConcept", "Quantity"],
                ),
            ],
        ),
    ]
}

pub fn package(name: &str, resources: Vec<Value>) -> FhirPackage {
    FhirPackage::new(PackageManifest::synthesized(name, "1.0.0"), resources, vec![])
}

/// Registry holding the core definitions plus `extra`.
pub fn registry_with(extra: Vec<Value>) -> Arc<DefinitionRegistry> {
    let registry = Arc::new(DefinitionRegistry::default());
    registry
        .ingest(&[package("test.core", core_definitions()), package("test.ig", extra)])
        .expect("ingest fixtures");
    registry
}
