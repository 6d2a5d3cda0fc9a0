use serde_json::json;
use vigil_models::common::{
    BindingStrength, ChoiceValue, DiscriminatorType, SlicingRules, StructureDefinition,
    StructureDefinitionKind, TypeDerivationRule,
};

fn mrn_profile() -> serde_json::Value {
    json!({
        "resourceType": "StructureDefinition",
        "id": "mrn-patient",
        "url": "http://example.org/StructureDefinition/mrn-patient",
        "version": "1.0.0",
        "name": "MrnPatient",
        "status": "active",
        "kind": "resource",
        "abstract": false,
        "type": "Patient",
        "baseDefinition": "http://hl7.org/fhir/StructureDefinition/Patient",
        "derivation": "constraint",
        "differential": {
            "element": [
                {
                    "id": "Patient.identifier",
                    "path": "Patient.identifier",
                    "slicing": {
                        "discriminator": [{"type": "value", "path": "system"}],
                        "rules": "closed"
                    },
                    "min": 1
                },
                {
                    "id": "Patient.identifier:mrn",
                    "path": "Patient.identifier",
                    "sliceName": "mrn",
                    "min": 1,
                    "max": "1"
                },
                {
                    "id": "Patient.identifier:mrn.system",
                    "path": "Patient.identifier.system",
                    "fixedUri": "http://example.org/mrn"
                },
                {
                    "id": "Patient.gender",
                    "path": "Patient.gender",
                    "binding": {
                        "strength": "required",
                        "valueSet": "http://hl7.org/fhir/ValueSet/administrative-gender|4.0.1"
                    }
                }
            ]
        }
    })
}

#[test]
fn parses_constraint_profile_differential() {
    let sd = StructureDefinition::from_value(&mrn_profile()).unwrap();

    assert_eq!(sd.kind, StructureDefinitionKind::Resource);
    assert_eq!(sd.derivation, Some(TypeDerivationRule::Constraint));
    assert_eq!(
        sd.canonical(),
        "http://example.org/StructureDefinition/mrn-patient|1.0.0"
    );
    assert!(sd.has_differential());
    assert!(sd.snapshot_elements().is_none());

    let elements = sd.differential_elements();
    let slicing = elements[0].slicing.as_ref().unwrap();
    assert_eq!(slicing.rules, SlicingRules::Closed);
    assert_eq!(
        slicing.discriminators()[0].discriminator_type,
        DiscriminatorType::Value
    );
    assert_eq!(elements[1].key(), "Patient.identifier:mrn");
    assert_eq!(elements[2].fixed_value().unwrap().0, "Uri");
    assert_eq!(
        elements[3].binding.as_ref().unwrap().strength,
        BindingStrength::Required
    );
}

#[test]
fn serializing_keeps_unmodelled_properties() {
    let mut value = mrn_profile();
    value["jurisdiction"] = json!([{"coding": [{"code": "DE"}]}]);
    let sd = StructureDefinition::from_value(&value).unwrap();
    let back = serde_json::to_value(&sd).unwrap();
    assert_eq!(back["jurisdiction"], value["jurisdiction"]);
    assert_eq!(back["differential"]["element"][2]["fixedUri"], json!("http://example.org/mrn"));
}

#[test]
fn choice_group_on_instance() {
    let observation = json!({
        "resourceType": "Observation",
        "status": "final",
        "valueQuantity": {"value": 5}
    });
    let obj = observation.as_object().unwrap();
    match vigil_models::common::resolve_choice(obj, "value", |_| false) {
        ChoiceValue::One { type_code, .. } => assert_eq!(type_code, "Quantity"),
        other => panic!("unexpected {other:?}"),
    }
}
