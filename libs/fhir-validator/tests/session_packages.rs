mod test_support;

use serde_json::json;
use test_support::{
    core_definitions, core_type, el, listing, package_tgz, profile, session_config,
    write_package_dir, EXAMPLE,
};
use tempfile::TempDir;
use vigil_validator::{
    DuplicatePolicy, LoadOptions, SessionError, ValidateError, ValidateOptions, ValidatorSession,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn identifier_profile() -> serde_json::Value {
    profile(
        "required-identifier",
        "Patient",
        vec![json!({"id": "Patient.identifier", "path": "Patient.identifier", "min": 1})],
    )
}

/// Session over the core fixtures, pointed at `registry_url`.
async fn session(registry_url: &str) -> (ValidatorSession, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let core_dir = dir.path().join("core");
    write_package_dir(&core_dir, "test.core", "4.0.1", &core_definitions());
    let config = session_config(&core_dir, &dir.path().join("cache"), registry_url);
    let session = ValidatorSession::new(config).unwrap();
    session.initialize().await.unwrap();
    (session, dir)
}

async fn mount_pkg(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/pkg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(&["1.0.0", "1.8.5", "1.2.0"])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pkg/1.8.5"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(package_tgz("pkg", "1.8.5", &[identifier_profile()])),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn unversioned_load_picks_greatest_version() {
    let server = MockServer::start().await;
    mount_pkg(&server).await;
    let (session, _dir) = session(&server.uri()).await;

    let loaded = session
        .load_ig_with_metadata("pkg", &LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(loaded.name, "pkg");
    assert_eq!(loaded.version, "1.8.5");
    assert_eq!(loaded.resource_count, 1);
    assert_eq!(loaded.packages.len(), 1);

    assert_eq!(session.get_latest_package_version("pkg").await.unwrap(), "1.8.5");
    assert_eq!(
        session.list_package_versions("pkg").await.unwrap(),
        vec!["1.0.0", "1.2.0", "1.8.5"]
    );

    let patient = json!({
        "resourceType": "Patient",
        "meta": {"profile": [format!("{EXAMPLE}required-identifier")]}
    });
    let outcome = session
        .validate(&patient, &ValidateOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.issues_at("Patient.identifier").count(), 1);
}

#[tokio::test]
async fn loading_twice_downloads_once() {
    let server = MockServer::start().await;
    mount_pkg(&server).await;
    let (session, _dir) = session(&server.uri()).await;

    let first = session.load_ig("pkg@1.8.5", &LoadOptions::default()).await.unwrap();
    let second = session.load_ig("pkg@1.8.5", &LoadOptions::default()).await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 1);

    let names: Vec<String> = session.loaded_packages().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["test.core", "pkg"]);
}

#[tokio::test]
async fn load_options_override_the_registry() {
    let server = MockServer::start().await;
    mount_pkg(&server).await;
    let (session, _dir) = session("http://127.0.0.1:9").await;

    let options = LoadOptions {
        registry_url: Some(server.uri()),
        ..LoadOptions::default()
    };
    let loaded = session.load_ig_with_metadata("pkg", &options).await.unwrap();
    assert_eq!(loaded.version, "1.8.5");
}

#[tokio::test]
async fn failed_load_leaves_the_session_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.ig/1.0.0"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let (session, _dir) = session(&server.uri()).await;
    let before = session.registry().len();

    let result = session.load_ig("missing.ig#1.0.0", &LoadOptions::default()).await;
    assert!(matches!(
        result,
        Err(SessionError::Acquisition(vigil_registry_client::Error::PackageNotFound { .. }))
    ));
    assert_eq!(session.registry().len(), before);
    assert_eq!(session.loaded_packages().len(), 1);
}

#[tokio::test]
async fn rejected_duplicates_are_not_registered() {
    let server = MockServer::start().await;
    let duplicate = core_type("Patient", "resource", vec![el("Patient.id", 0, "1", &["id"])]);
    Mock::given(method("GET"))
        .and(path("/dup.ig/1.0.0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(package_tgz("dup.ig", "1.0.0", &[duplicate])),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let core_dir = dir.path().join("core");
    write_package_dir(&core_dir, "test.core", "4.0.1", &core_definitions());
    let mut config = session_config(&core_dir, &dir.path().join("cache"), &server.uri());
    config.duplicate_policy = DuplicatePolicy::Reject;
    let session = ValidatorSession::new(config).unwrap();
    session.initialize().await.unwrap();
    let before = session.registry().len();

    let result = session.load_ig("dup.ig#1.0.0", &LoadOptions::default()).await;
    assert!(matches!(result, Err(SessionError::Definitions(_))));
    assert_eq!(session.registry().len(), before);
    assert!(!session.registry().has_package("dup.ig"));
}

#[tokio::test]
async fn reset_requires_initializing_again() {
    let (session, _dir) = session("http://127.0.0.1:9").await;
    assert!(!session.loaded_packages().is_empty());

    session.reset().await;
    assert!(session.loaded_packages().is_empty());
    assert!(session.registry().is_empty());
    let result = session
        .validate(&json!({"resourceType": "Patient"}), &ValidateOptions::default())
        .await;
    assert_eq!(result.unwrap_err(), ValidateError::NotInitialized);

    session.initialize().await.unwrap();
    let outcome = session
        .validate(&json!({"resourceType": "Patient", "active": true}), &ValidateOptions::default())
        .await
        .unwrap();
    assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
}
