mod test_support;

use serde_json::json;
use std::collections::HashSet;
use test_support::{core_definitions, el, profile, registry_with, CORE};
use vigil_models::{parse_max, StructureDefinition};
use vigil_snapshot::{ExpandedFhirContext, WarningKind};

#[test]
fn root_types_resolve_to_their_own_elements() {
    let registry = registry_with(vec![]);
    let context = ExpandedFhirContext::new(registry);

    for definition in core_definitions() {
        let sd = StructureDefinition::from_value(&definition).unwrap();
        let resolved = context.resolve(&sd.url, None).unwrap();
        assert_eq!(resolved.elements(), sd.snapshot_elements().unwrap(), "{}", sd.url);
        assert!(resolved.warnings.is_empty());
    }
}

#[test]
fn profile_snapshots_are_supersets_that_only_narrow() {
    let profiles = vec![
        profile(
            "http://example.org/StructureDefinition/required-identifier",
            "Patient",
            &format!("{CORE}Patient"),
            vec![json!({"id": "Patient.identifier", "path": "Patient.identifier", "min": 1})],
        ),
        profile(
            "http://example.org/StructureDefinition/single-name",
            "Patient",
            "http://example.org/StructureDefinition/required-identifier",
            vec![
                json!({"id": "Patient.name", "path": "Patient.name", "min": 1, "max": "1"}),
                json!({"id": "Patient.name.family", "path": "Patient.name.family", "min": 1}),
                json!({"id": "Patient.deceased[x]", "path": "Patient.deceased[x]", "max": "0"}),
            ],
        ),
        profile(
            "http://example.org/StructureDefinition/mrn",
            "Patient",
            &format!("{CORE}Patient"),
            vec![
                json!({"id": "Patient.identifier", "path": "Patient.identifier",
                       "slicing": {"discriminator": [{"type": "value", "path": "system"}], "rules": "open"}}),
                json!({"id": "Patient.identifier:mrn", "path": "Patient.identifier", "sliceName": "mrn",
                       "min": 1, "max": "1"}),
                json!({"id": "Patient.identifier:mrn.system", "path": "Patient.identifier.system",
                       "min": 1, "fixedUri": "http://hospital.example/mrn"}),
            ],
        ),
    ];
    let urls: Vec<String> = profiles
        .iter()
        .map(|p| p["url"].as_str().unwrap().to_string())
        .collect();
    let context = ExpandedFhirContext::new(registry_with(profiles));
    let base = context.resolve(&format!("{CORE}Patient"), None).unwrap();

    for url in &urls {
        let resolved = context.resolve(url, None).unwrap();
        assert!(resolved.warnings.is_empty(), "{url}: {:?}", resolved.warnings);

        let paths: HashSet<&str> = resolved.elements().iter().map(|e| e.path.as_str()).collect();
        for base_element in base.elements() {
            assert!(paths.contains(base_element.path.as_str()), "{url} lost {}", base_element.path);
        }

        for element in resolved.elements() {
            let Some(inherited) = &element.base else {
                continue;
            };
            assert!(element.min_cardinality() >= inherited.min, "{url} {}", element.element_id());
            if let Some(inherited_max) = parse_max(&inherited.max) {
                let max = element.max_bound().unwrap_or(u32::MAX);
                assert!(max <= inherited_max, "{url} {}", element.element_id());
            }
        }
    }

    let single_name = context
        .resolve("http://example.org/StructureDefinition/single-name", None)
        .unwrap();
    let identifier = single_name
        .elements()
        .iter()
        .find(|e| e.element_id() == "Patient.identifier")
        .unwrap();
    assert_eq!(identifier.min, Some(1));
    assert!(single_name
        .elements()
        .iter()
        .any(|e| e.element_id() == "Patient.name.given"));
}

#[test]
fn extension_profile_with_required_sub_extension() {
    let url = "http://example.org/StructureDefinition/outer";
    let context = ExpandedFhirContext::new(registry_with(vec![profile(
        url,
        "Extension",
        &format!("{CORE}Extension"),
        vec![
            json!({"id": "Extension.extension", "path": "Extension.extension",
                   "slicing": {"discriminator": [{"type": "value", "path": "url"}], "rules": "open"}}),
            json!({"id": "Extension.extension:inner", "path": "Extension.extension",
                   "sliceName": "inner", "min": 1, "max": "1"}),
            json!({"id": "Extension.extension:inner.url", "path": "Extension.extension.url",
                   "fixedUri": "inner"}),
            json!({"id": "Extension.extension:inner.value[x]", "path": "Extension.extension.value[x]",
                   "type": [{"code": "string"}]}),
            json!({"id": "Extension.url", "path": "Extension.url", "fixedUri": url}),
            json!({"id": "Extension.value[x]", "path": "Extension.value[x]", "max": "0"}),
        ],
    )]));

    let resolved = context.resolve(url, None).unwrap();
    assert!(resolved.warnings.is_empty(), "{:?}", resolved.warnings);
    let ids: Vec<String> = resolved.elements().iter().map(|e| e.element_id()).collect();
    let inner = ids.iter().position(|id| id == "Extension.extension:inner").unwrap();
    assert_eq!(ids[inner + 1], "Extension.extension:inner.id");
    assert!(ids.contains(&"Extension.extension:inner.url".to_string()));
    let outer_url = ids.iter().position(|id| id == "Extension.url").unwrap();
    assert!(outer_url > inner);

    let inner_value = resolved
        .elements()
        .iter()
        .find(|e| e.element_id() == "Extension.extension:inner.value[x]")
        .unwrap();
    assert_eq!(inner_value.type_codes(), vec!["string"]);
    assert_eq!(inner_value.path, "Extension.extension.value[x]");
    assert!(resolved.depends_on(&format!("{CORE}Extension")));
}

#[test]
fn widening_is_reported_not_applied() {
    let url = "http://example.org/StructureDefinition/widening";
    let context = ExpandedFhirContext::new(registry_with(vec![
        profile(
            "http://example.org/StructureDefinition/strict",
            "Patient",
            &format!("{CORE}Patient"),
            vec![json!({"id": "Patient.name", "path": "Patient.name", "min": 1, "max": "1"})],
        ),
        profile(
            url,
            "Patient",
            "http://example.org/StructureDefinition/strict",
            vec![
                json!({"id": "Patient.name", "path": "Patient.name", "min": 0, "max": "*"}),
                json!({"id": "Patient.active", "path": "Patient.active", "type": [{"code": "string"}]}),
            ],
        ),
    ]));

    let resolved = context.resolve(url, None).unwrap();
    let name = resolved
        .elements()
        .iter()
        .find(|e| e.element_id() == "Patient.name")
        .unwrap();
    assert_eq!(name.cardinality_string(), "1..1");

    let kinds: Vec<WarningKind> = resolved.warnings.iter().map(|w| w.kind).collect();
    assert_eq!(
        kinds,
        vec![
            WarningKind::CardinalityWidening,
            WarningKind::CardinalityWidening,
            WarningKind::TypeWidening
        ]
    );
}

#[test]
fn new_element_lands_after_parent_descendants() {
    let url = "http://example.org/StructureDefinition/logical";
    let base = json!({
        "resourceType": "StructureDefinition",
        "url": "http://example.org/StructureDefinition/Base",
        "name": "Base",
        "kind": "logical",
        "type": "http://example.org/StructureDefinition/Base",
        "snapshot": {"element": [el("Base", 0, "*", &[]), el("Base.a", 0, "1", &["string"])]}
    });
    let mut derived = profile(
        url,
        "http://example.org/StructureDefinition/Base",
        "http://example.org/StructureDefinition/Base",
        vec![json!({"id": "Base.b", "path": "Base.b", "min": 0, "max": "1", "type": [{"code": "string"}]})],
    );
    derived["kind"] = json!("logical");
    derived["derivation"] = json!("specialization");

    let context = ExpandedFhirContext::new(registry_with(vec![base, derived]));
    let resolved = context.resolve(url, None).unwrap();
    let ids: Vec<String> = resolved.elements().iter().map(|e| e.element_id()).collect();
    assert_eq!(ids, vec!["Base", "Base.a", "Base.b"]);
}
