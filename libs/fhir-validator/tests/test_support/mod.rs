#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;
use vigil_validator::{RegistryConfig, SessionConfig, ValidatorConfig, ValidatorSession};

pub const CORE: &str = "http://hl7.org/fhir/StructureDefinition/";
pub const EXAMPLE: &str = "http://example.org/fhir/StructureDefinition/";
pub const OBSERVATION_STATUS: &str = "http://hl7.org/fhir/ValueSet/observation-status";

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

/// Constraint on `type_` defined by a differential.
pub fn profile(name: &str, type_: &str, differential: Vec<Value>) -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "url": format!("{EXAMPLE}{name}"),
        "name": name,
        "status": "active",
        "kind": if type_ == "Extension" { "complex-type" } else { "resource" },
        "abstract": false,
        "type": type_,
        "baseDefinition": format!("{CORE}{type_}"),
        "derivation": "constraint",
        "differential": {"element": differential}
    })
}

/// A small slice of the R4 core definitions.
pub fn core_definitions() -> Vec<Value> {
    let mut status = el("Observation.status", 1, "1", &["code"]);
    status["binding"] = json!({"strength": "required", "valueSet": OBSERVATION_STATUS});

    vec![
        core_type(
            "Patient",
            "resource",
            vec![
                el("Patient.id", 0, "1", &["id"]),
                el("Patient.meta", 0, "1", &["Meta"]),
                el("Patient.contained", 0, "*", &["Resource"]),
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
            "Observation",
            "resource",
            vec![
                el("Observation.id", 0, "1", &["id"]),
                el("Observation.meta", 0, "1", &["Meta"]),
                status,
                el("Observation.code", 1, "1", &["CodeableConcept"]),
                el("Observation.value[x]", 0, "1", &["Quantity", "string", "CodeableConcept"]),
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
            "CodeableConcept",
            "complex-type",
            vec![
                el("CodeableConcept.coding", 0, "*", &["Coding"]),
                el("CodeableConcept.text", 0, "1", &["string"]),
            ],
        ),
        core_type(
            "Coding",
            "complex-type",
            vec![
                el("Coding.system", 0, "1", &["uri"]),
                el("Coding.code", 0, "1", &["code"]),
                el("Coding.display", 0, "1", &["string"]),
            ],
        ),
        core_type(
            "Quantity",
            "complex-type",
            vec![
                el("Quantity.value", 0, "1", &["decimal"]),
                el("Quantity.unit", 0, "1", &["string"]),
                el("Quantity.system", 0, "1", &["uri"]),
                el("Quantity.code", 0, "1", &["code"]),
            ],
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
        json!({
            "resourceType": "ValueSet",
            "url": OBSERVATION_STATUS,
            "status": "active",
            "compose": {
                "include": [{
                    "system": "http://hl7.org/fhir/observation-status",
                    "concept": [{"code": "registered"}, {"code": "preliminary"}, {"code": "final"}]
                }]
            }
        }),
    ]
}

/// Complex extension `outer` requiring one `inner` sub-extension, with a
/// full snapshot.
pub fn nested_extension() -> Value {
    let url = format!("{EXAMPLE}outer");

    let mut extension = el("Extension.extension", 0, "*", &["Extension"]);
    extension["slicing"] = json!({
        "discriminator": [{"type": "value", "path": "url"}],
        "rules": "open"
    });
    let mut inner = el("Extension.extension", 1, "1", &["Extension"]);
    inner["id"] = json!("Extension.extension:inner");
    inner["sliceName"] = json!("inner");
    inner["base"] = json!({"path": "Extension.extension", "min": 0, "max": "*"});
    let mut inner_url = el("Extension.extension.url", 1, "1", &["uri"]);
    inner_url["id"] = json!("Extension.extension:inner.url");
    inner_url["fixedUri"] = json!("inner");
    let mut inner_value = el("Extension.extension.value[x]", 0, "1", &["string"]);
    inner_value["id"] = json!("Extension.extension:inner.value[x]");
    let mut outer_url = el("Extension.url", 1, "1", &["uri"]);
    outer_url["fixedUri"] = json!(url);

    json!({
        "resourceType": "StructureDefinition",
        "url": url,
        "name": "Outer",
        "status": "active",
        "kind": "complex-type",
        "abstract": false,
        "type": "Extension",
        "baseDefinition": format!("{CORE}Extension"),
        "derivation": "constraint",
        "snapshot": {"element": [
            el("Extension", 0, "*", &[]),
            extension,
            inner,
            inner_url,
            inner_value,
            outer_url,
            el("Extension.value[x]", 0, "0", &["string"]),
        ]}
    })
}

/// Write `dir/package/package.json` plus one file per resource.
pub fn write_package_dir(dir: &Path, name: &str, version: &str, resources: &[Value]) {
    let package = dir.join("package");
    std::fs::create_dir_all(&package).unwrap();
    let manifest = json!({"name": name, "version": version, "dependencies": {}});
    std::fs::write(package.join("package.json"), serde_json::to_vec(&manifest).unwrap()).unwrap();
    for (i, resource) in resources.iter().enumerate() {
        std::fs::write(
            package.join(format!("resource-{i}.json")),
            serde_json::to_vec(resource).unwrap(),
        )
        .unwrap();
    }
}

/// Build a package tarball with the given resources.
pub fn package_tgz(name: &str, version: &str, resources: &[Value]) -> Vec<u8> {
    let manifest = json!({"name": name, "version": version});
    let mut files = vec![("package/package.json".to_string(), manifest)];
    for (i, resource) in resources.iter().enumerate() {
        files.push((format!("package/resource-{i}.json"), resource.clone()));
    }

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, value) in files {
        let bytes = serde_json::to_vec(&value).unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, bytes.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn listing(versions: &[&str]) -> Value {
    let entries: serde_json::Map<String, Value> = versions
        .iter()
        .map(|v| (v.to_string(), json!({"version": v})))
        .collect();
    json!({"versions": entries})
}

/// Session config reading the core fixtures from `core_dir` and caching
/// into `cache_dir`.
pub fn session_config(core_dir: &Path, cache_dir: &Path, registry_url: &str) -> SessionConfig {
    SessionConfig {
        registry: RegistryConfig {
            registry_url: registry_url.to_string(),
            cache_dir: Some(cache_dir.to_path_buf()),
            http_timeout_ms: 5_000,
            ..Default::default()
        },
        validation: ValidatorConfig::default(),
        base_packages: vec![core_dir.display().to_string()],
        ..Default::default()
    }
}

/// Initialized session over the core fixtures plus an `example.ig` package
/// holding `resources`. The directory must outlive the session's loads.
pub async fn session_with(resources: Vec<Value>, validation: ValidatorConfig) -> (ValidatorSession, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let core_dir = dir.path().join("core");
    let ig_dir = dir.path().join("ig");
    write_package_dir(&core_dir, "test.core", "4.0.1", &core_definitions());
    write_package_dir(&ig_dir, "example.ig", "1.0.0", &resources);

    let mut config = session_config(&core_dir, &dir.path().join("cache"), "http://127.0.0.1:9");
    config.base_packages.push(ig_dir.display().to_string());
    config.validation = validation;

    let session = ValidatorSession::new(config).unwrap();
    session.initialize().await.unwrap();
    (session, dir)
}
