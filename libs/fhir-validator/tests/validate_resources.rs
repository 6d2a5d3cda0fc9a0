mod test_support;

use serde_json::{json, Value};
use std::sync::Arc;
use test_support::{
    core_definitions, nested_extension, profile, session_config, session_with, write_package_dir,
    EXAMPLE,
};
use vigil_validator::{
    EvaluationError, IssueCode, IssueSeverity, ValidateError, ValidateOptions, ValidatorConfig,
    ValidatorSession,
};

fn url(name: &str) -> String {
    format!("{EXAMPLE}{name}")
}

fn patient_with_profile(name: &str, extra: Value) -> Value {
    let mut patient = json!({
        "resourceType": "Patient",
        "meta": {"profile": [url(name)]}
    });
    if let (Some(target), Value::Object(extra)) = (patient.as_object_mut(), extra) {
        target.extend(extra);
    }
    patient
}

fn required_identifier() -> Value {
    profile(
        "required-identifier",
        "Patient",
        vec![json!({"id": "Patient.identifier", "path": "Patient.identifier", "min": 1})],
    )
}

fn mrn_patient() -> Value {
    profile(
        "mrn-patient",
        "Patient",
        vec![
            json!({
                "id": "Patient.identifier",
                "path": "Patient.identifier",
                "slicing": {
                    "discriminator": [{"type": "value", "path": "system"}],
                    "rules": "closed"
                }
            }),
            json!({
                "id": "Patient.identifier:mrn",
                "path": "Patient.identifier",
                "sliceName": "mrn",
                "min": 1,
                "max": "1"
            }),
            json!({
                "id": "Patient.identifier:mrn.system",
                "path": "Patient.identifier.system",
                "min": 1,
                "fixedUri": "http://hospital.org/mrn"
            }),
        ],
    )
}

fn outer_patient() -> Value {
    profile(
        "outer-patient",
        "Patient",
        vec![json!({
            "id": "Patient.extension:outer",
            "path": "Patient.extension",
            "sliceName": "outer",
            "min": 1,
            "max": "1",
            "type": [{"code": "Extension", "profile": [url("outer")]}]
        })],
    )
}

async fn validate(resources: Vec<Value>, resource: &Value) -> vigil_validator::ValidationOutcome {
    let (session, _dir) = session_with(resources, ValidatorConfig::default()).await;
    session
        .validate(resource, &ValidateOptions::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn missing_required_identifier_is_an_error() {
    let patient = patient_with_profile("required-identifier", json!({"active": true}));
    let outcome = validate(vec![required_identifier()], &patient).await;

    assert!(!outcome.valid);
    let issue = outcome
        .issues
        .iter()
        .find(|i| i.severity == IssueSeverity::Error)
        .unwrap();
    assert_eq!(issue.code, IssueCode::Required);
    assert!(issue
        .expression
        .iter()
        .flatten()
        .any(|e| e.contains("identifier")));
    assert_eq!(issue.source.as_deref(), Some(url("required-identifier").as_str()));

    let rendered = outcome.to_operation_outcome();
    assert_eq!(rendered["resourceType"], "OperationOutcome");
    assert!(rendered["issue"]
        .as_array()
        .unwrap()
        .iter()
        .any(|i| i["severity"] == "error" && i["expression"][0] == "Patient.identifier"));
}

#[tokio::test]
async fn identifier_satisfying_the_profile_passes() {
    let patient = patient_with_profile(
        "required-identifier",
        json!({"identifier": [{"system": "http://example.org/ids", "value": "123"}]}),
    );
    let outcome = validate(vec![required_identifier()], &patient).await;
    assert_eq!(outcome.error_count(), 0, "{:?}", outcome.issues);
    assert!(outcome.valid);
}

#[tokio::test]
async fn missing_nested_extension_is_reported_once() {
    let patient = patient_with_profile(
        "outer-patient",
        json!({"extension": [{"url": url("outer")}]}),
    );
    let outcome = validate(vec![nested_extension(), outer_patient()], &patient).await;

    let errors: Vec<_> = outcome
        .issues
        .iter()
        .filter(|i| i.severity.is_error())
        .collect();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(
        errors[0].expression,
        Some(vec!["Patient.extension[0].extension".to_string()])
    );
    assert!(errors[0].diagnostics.contains("'inner'"));
}

#[tokio::test]
async fn nested_extension_present_passes() {
    let patient = patient_with_profile(
        "outer-patient",
        json!({"extension": [{
            "url": url("outer"),
            "extension": [{"url": "inner", "valueString": "x"}]
        }]}),
    );
    let outcome = validate(vec![nested_extension(), outer_patient()], &patient).await;
    assert_eq!(outcome.error_count(), 0, "{:?}", outcome.issues);
}

#[tokio::test]
async fn closed_slicing_rejects_unmatched_entry_once() {
    let patient = patient_with_profile(
        "mrn-patient",
        json!({"identifier": [
            {"system": "http://hospital.org/mrn", "value": "1"},
            {"system": "http://other.org/ids", "value": "2"}
        ]}),
    );
    let outcome = validate(vec![mrn_patient()], &patient).await;

    assert_eq!(outcome.error_count(), 1, "{:?}", outcome.issues);
    let issue = outcome.issues_at("Patient.identifier[1]").next().unwrap();
    assert_eq!(issue.code, IssueCode::Structure);
    assert!(issue.diagnostics.contains("closed"));
}

#[tokio::test]
async fn slice_cardinality_is_checked() {
    let patient = patient_with_profile(
        "mrn-patient",
        json!({"identifier": [
            {"system": "http://hospital.org/mrn", "value": "1"},
            {"system": "http://hospital.org/mrn", "value": "2"}
        ]}),
    );
    let outcome = validate(vec![mrn_patient()], &patient).await;

    assert_eq!(outcome.error_count(), 1, "{:?}", outcome.issues);
    let issue = outcome.issues_at("Patient.identifier").next().unwrap();
    assert!(issue.diagnostics.contains("at most 1"));
}

#[tokio::test]
async fn choice_elements_allow_exactly_one_type() {
    let (session, _dir) = session_with(
        vec![profile(
            "deceased-required",
            "Patient",
            vec![json!({"id": "Patient.deceased[x]", "path": "Patient.deceased[x]", "min": 1})],
        )],
        ValidatorConfig::default(),
    )
    .await;
    let options = ValidateOptions::default();

    let both = json!({
        "resourceType": "Patient",
        "deceasedBoolean": true,
        "deceasedDateTime": "2020-01-01"
    });
    let outcome = session.validate(&both, &options).await.unwrap();
    assert_eq!(outcome.error_count(), 1, "{:?}", outcome.issues);
    assert_eq!(outcome.issues_at("Patient.deceased[x]").count(), 1);

    let wrong_type = json!({"resourceType": "Patient", "deceasedString": "yes"});
    let outcome = session.validate(&wrong_type, &options).await.unwrap();
    assert_eq!(outcome.issues_at("Patient.deceasedString").count(), 1);

    let one = json!({"resourceType": "Patient", "deceasedBoolean": false});
    let outcome = session.validate(&one, &options).await.unwrap();
    assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);

    let neither = patient_with_profile("deceased-required", json!({}));
    let outcome = session.validate(&neither, &options).await.unwrap();
    let issue = outcome.issues_at("Patient.deceased[x]").next().unwrap();
    assert_eq!(issue.code, IssueCode::Required);
}

#[tokio::test]
async fn explicit_unknown_profile_is_rejected() {
    let (session, _dir) = session_with(vec![], ValidatorConfig::default()).await;
    let result = session
        .validate(
            &json!({"resourceType": "Patient"}),
            &ValidateOptions::with_profile(url("missing")),
        )
        .await;
    assert_eq!(result.unwrap_err(), ValidateError::UnknownProfile(url("missing")));
}

#[tokio::test]
async fn unknown_declared_profile_is_an_issue() {
    let patient = patient_with_profile("missing", json!({}));
    let outcome = validate(vec![], &patient).await;
    let issue = outcome.issues_at("Patient.meta.profile[0]").next().unwrap();
    assert_eq!(issue.code, IssueCode::NotFound);
    assert_eq!(issue.severity, IssueSeverity::Error);
}

#[tokio::test]
async fn explicit_profile_replaces_declared_ones() {
    let (session, _dir) = session_with(vec![required_identifier()], ValidatorConfig::default()).await;
    let patient = json!({"resourceType": "Patient", "active": "yes"});

    let outcome = session
        .validate(&patient, &ValidateOptions::with_profile(url("required-identifier")))
        .await
        .unwrap();
    assert_eq!(outcome.issues_at("Patient.identifier").count(), 1);
    assert_eq!(outcome.issues_at("Patient.active").count(), 1);
    assert!(outcome
        .issues
        .iter()
        .all(|i| i.source.as_deref() == Some(url("required-identifier").as_str())));
}

#[tokio::test]
async fn contained_resources_are_validated() {
    let patient = json!({
        "resourceType": "Patient",
        "contained": [{"resourceType": "Patient", "id": "p1", "active": "nope"}]
    });
    let outcome = validate(vec![], &patient).await;
    assert_eq!(outcome.error_count(), 1, "{:?}", outcome.issues);
    assert_eq!(outcome.issues_at("Patient.contained[0].active").count(), 1);
}

#[tokio::test]
async fn required_binding_uses_loaded_value_sets() {
    let (session, _dir) = session_with(vec![], ValidatorConfig::default()).await;
    let options = ValidateOptions::default();

    let bad = json!({"resourceType": "Observation", "status": "bogus", "code": {"text": "HR"}});
    let outcome = session.validate(&bad, &options).await.unwrap();
    let issue = outcome.issues_at("Observation.status").next().unwrap();
    assert_eq!(issue.code, IssueCode::CodeInvalid);
    assert_eq!(issue.severity, IssueSeverity::Error);

    let good = json!({"resourceType": "Observation", "status": "final", "code": {"text": "HR"}});
    let outcome = session.validate(&good, &options).await.unwrap();
    assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
}

#[tokio::test]
async fn invariants_use_the_injected_evaluator() {
    let dir = tempfile::tempdir().unwrap();
    let core_dir = dir.path().join("core");
    let ig_dir = dir.path().join("ig");
    write_package_dir(&core_dir, "test.core", "4.0.1", &core_definitions());
    write_package_dir(
        &ig_dir,
        "example.ig",
        "1.0.0",
        &[profile(
            "named-patient",
            "Patient",
            vec![json!({
                "id": "Patient",
                "path": "Patient",
                "constraint": [{
                    "key": "pat-1",
                    "severity": "error",
                    "human": "A name is required",
                    "expression": "name.exists()"
                }]
            })],
        )],
    );
    let mut config = session_config(&core_dir, &dir.path().join("cache"), "http://127.0.0.1:9");
    config.base_packages.push(ig_dir.display().to_string());

    let evaluator = |expression: &str, focus: &Value, _: &Value| -> Result<bool, EvaluationError> {
        match expression {
            "name.exists()" => Ok(focus.get("name").is_some()),
            other => Err(EvaluationError::new(format!("unsupported: {other}"))),
        }
    };
    let session = ValidatorSession::builder()
        .config(config)
        .constraint_evaluator(Arc::new(evaluator))
        .build()
        .unwrap();
    session.initialize().await.unwrap();

    let outcome = session
        .validate(
            &patient_with_profile("named-patient", json!({})),
            &ValidateOptions::default(),
        )
        .await
        .unwrap();
    let issue = outcome.issues_at("Patient").next().unwrap();
    assert_eq!(issue.code, IssueCode::Invariant);
    assert_eq!(issue.diagnostics, "Constraint failed: pat-1: A name is required");

    let named = patient_with_profile("named-patient", json!({"name": [{"family": "Chalmers"}]}));
    let outcome = session.validate(&named, &ValidateOptions::default()).await.unwrap();
    assert_eq!(outcome.error_count(), 0, "{:?}", outcome.issues);
}

#[tokio::test]
async fn absent_must_support_elements_are_reported_when_enabled() {
    let must_support_name = profile(
        "ms-patient",
        "Patient",
        vec![json!({"id": "Patient.name", "path": "Patient.name", "mustSupport": true})],
    );
    let config = ValidatorConfig::builder().report_must_support(true).build();
    let (session, _dir) = session_with(vec![must_support_name], config).await;

    let outcome = session
        .validate(&patient_with_profile("ms-patient", json!({})), &ValidateOptions::default())
        .await
        .unwrap();
    assert!(outcome.valid);
    let issue = outcome.issues_at("Patient.name").next().unwrap();
    assert_eq!(issue.severity, IssueSeverity::Information);
}

#[tokio::test]
async fn issue_limit_truncates_the_outcome() {
    let config = ValidatorConfig::builder().max_issues(2).build();
    let (session, _dir) = session_with(vec![], config).await;
    let patient = json!({
        "resourceType": "Patient",
        "active": "yes",
        "birthDate": "someday",
        "gender": 7,
        "nickname": "Bob"
    });
    let outcome = session.validate(&patient, &ValidateOptions::default()).await.unwrap();
    assert_eq!(outcome.issues.len(), 2);
}

#[tokio::test]
async fn widening_profile_is_a_warning_at_the_root() {
    let widening = profile(
        "widening",
        "Patient",
        vec![json!({"id": "Patient.active", "path": "Patient.active", "max": "*"})],
    );
    let patient = patient_with_profile("widening", json!({"active": true}));
    let outcome = validate(vec![widening], &patient).await;

    assert_eq!(outcome.error_count(), 0, "{:?}", outcome.issues);
    let issue = outcome.issues_at("Patient").next().unwrap();
    assert_eq!(issue.severity, IssueSeverity::Warning);
    assert_eq!(issue.code, IssueCode::BusinessRule);
    assert_eq!(issue.source.as_deref(), Some(url("widening").as_str()));
}

#[tokio::test]
async fn profile_with_missing_base_is_a_warning() {
    let mut broken = required_identifier();
    broken["url"] = json!(url("broken"));
    broken["baseDefinition"] = json!("http://example.org/missing");
    let patient = patient_with_profile("broken", json!({}));
    let outcome = validate(vec![broken], &patient).await;

    assert_eq!(outcome.error_count(), 0, "{:?}", outcome.issues);
    let issue = outcome.issues_at("Patient.meta.profile[0]").next().unwrap();
    assert_eq!(issue.severity, IssueSeverity::Warning);
    assert_eq!(issue.code, IssueCode::Processing);
}

#[tokio::test]
async fn choice_carried_by_its_shadow_is_present() {
    let value_required = profile(
        "value-required",
        "Observation",
        vec![json!({"id": "Observation.value[x]", "path": "Observation.value[x]", "min": 1})],
    );
    let observation = json!({
        "resourceType": "Observation",
        "meta": {"profile": [url("value-required")]},
        "status": "final",
        "code": {"text": "HR"},
        "_valueString": {
            "extension": [{
                "url": "http://hl7.org/fhir/StructureDefinition/data-absent-reason",
                "valueCode": "unknown"
            }]
        }
    });
    let outcome = validate(vec![value_required], &observation).await;
    assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);

    let both = json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {"text": "HR"},
        "valueString": "n/a",
        "_valueQuantity": {"id": "q"}
    });
    let outcome = validate(vec![], &both).await;
    assert_eq!(outcome.issues_at("Observation.value[x]").count(), 1, "{:?}", outcome.issues);
}
