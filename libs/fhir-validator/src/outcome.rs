//! Validation issues and their OperationOutcome rendering.

use serde_json::{json, Value};
use std::collections::HashSet;

/// Extension carrying the profile that produced an issue.
pub const ISSUE_SOURCE_EXTENSION: &str =
    "http://hl7.org/fhir/StructureDefinition/operationoutcome-issue-source";

/// Validation result for a single resource
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub resource_type: Option<String>,
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    pub fn new(resource_type: Option<String>, issues: Vec<ValidationIssue>) -> Self {
        let valid = !issues.iter().any(|i| i.severity.is_error());
        Self {
            resource_type,
            valid,
            issues,
        }
    }

    pub fn success(resource_type: Option<String>) -> Self {
        Self::new(resource_type, Vec::new())
    }

    pub fn has_errors(&self) -> bool {
        !self.valid
    }

    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .count()
    }

    /// Issues whose expression list contains `expression`.
    pub fn issues_at<'a>(&'a self, expression: &'a str) -> impl Iterator<Item = &'a ValidationIssue> {
        self.issues
            .iter()
            .filter(move |i| i.expression.iter().flatten().any(|e| e == expression))
    }

    /// Drop warning and information issues.
    pub fn without_warnings(mut self) -> Self {
        self.issues.retain(|i| i.severity.is_error());
        self
    }

    /// OperationOutcome JSON. An outcome without issues renders a single
    /// informational "All OK" issue.
    pub fn to_operation_outcome(&self) -> Value {
        let issues: Vec<Value> = if self.issues.is_empty() {
            vec![json!({
                "severity": "information",
                "code": IssueCode::Informational.to_string(),
                "diagnostics": "All OK",
            })]
        } else {
            self.issues.iter().map(ValidationIssue::to_json).collect()
        };
        json!({
            "resourceType": "OperationOutcome",
            "issue": issues
        })
    }
}

/// Individual validation issue
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub diagnostics: String,
    pub location: Option<String>,
    pub expression: Option<Vec<String>>,
    /// Profile whose pass produced the issue.
    pub source: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: IssueSeverity, code: IssueCode, diagnostics: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            diagnostics: diagnostics.into(),
            location: None,
            expression: None,
            source: None,
        }
    }

    pub fn error(code: IssueCode, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, diagnostics)
    }

    pub fn warning(code: IssueCode, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Warning, code, diagnostics)
    }

    pub fn information(code: IssueCode, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Information, code, diagnostics)
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_expression(mut self, expression: Vec<String>) -> Self {
        self.expression = Some(expression);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Point the issue at one instance path (location and expression).
    pub fn at(self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.with_location(path.clone()).with_expression(vec![path])
    }

    /// Same finding, regardless of which profile pass reported it.
    pub fn same_finding(&self, other: &ValidationIssue) -> bool {
        self.finding_key() == other.finding_key()
    }

    fn finding_key(&self) -> FindingKey<'_> {
        (
            self.severity,
            self.code,
            self.expression.as_deref(),
            self.diagnostics.as_str(),
        )
    }

    fn to_json(&self) -> Value {
        let mut issue = json!({
            "severity": self.severity.to_string().to_lowercase(),
            "code": self.code.to_string(),
            "diagnostics": self.diagnostics,
        });

        if let Some(ref loc) = self.location {
            issue["location"] = json!([loc]);
        }

        if let Some(ref expr) = self.expression {
            issue["expression"] = json!(expr);
        }

        if let Some(ref source) = self.source {
            issue["extension"] = json!([{
                "url": ISSUE_SOURCE_EXTENSION,
                "valueString": source,
            }]);
        }

        issue
    }
}

type FindingKey<'a> = (IssueSeverity, IssueCode, Option<&'a [String]>, &'a str);

/// Keep the first of each group of identical findings.
pub fn dedupe_issues(issues: Vec<ValidationIssue>) -> Vec<ValidationIssue> {
    let keep: Vec<bool> = {
        let mut seen: HashSet<FindingKey<'_>> = HashSet::with_capacity(issues.len());
        issues.iter().map(|i| seen.insert(i.finding_key())).collect()
    };
    issues
        .into_iter()
        .zip(keep)
        .filter_map(|(issue, keep)| keep.then_some(issue))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl IssueSeverity {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Fatal | Self::Error)
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal => write!(f, "Fatal"),
            Self::Error => write!(f, "Error"),
            Self::Warning => write!(f, "Warning"),
            Self::Information => write!(f, "Information"),
        }
    }
}

/// FHIR issue-type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueCode {
    Invalid,
    Structure,
    Required,
    Value,
    Invariant,
    Security,
    Login,
    Unknown,
    Expired,
    Forbidden,
    Suppressed,
    Processing,
    NotSupported,
    Duplicate,
    MultipleMatches,
    NotFound,
    Deleted,
    TooLong,
    CodeInvalid,
    Extension,
    TooCostly,
    BusinessRule,
    Conflict,
    Transient,
    LockError,
    NoStore,
    Exception,
    Timeout,
    Incomplete,
    Throttled,
    Informational,
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::Structure => "structure",
            Self::Required => "required",
            Self::Value => "value",
            Self::Invariant => "invariant",
            Self::Security => "security",
            Self::Login => "login",
            Self::Unknown => "unknown",
            Self::Expired => "expired",
            Self::Forbidden => "forbidden",
            Self::Suppressed => "suppressed",
            Self::Processing => "processing",
            Self::NotSupported => "not-supported",
            Self::Duplicate => "duplicate",
            Self::MultipleMatches => "multiple-matches",
            Self::NotFound => "not-found",
            Self::Deleted => "deleted",
            Self::TooLong => "too-long",
            Self::CodeInvalid => "code-invalid",
            Self::Extension => "extension",
            Self::TooCostly => "too-costly",
            Self::BusinessRule => "business-rule",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::LockError => "lock-error",
            Self::NoStore => "no-store",
            Self::Exception => "exception",
            Self::Timeout => "timeout",
            Self::Incomplete => "incomplete",
            Self::Throttled => "throttled",
            Self::Informational => "informational",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_validity() {
        let outcome = ValidationOutcome::new(
            Some("Patient".to_string()),
            vec![
                ValidationIssue::error(IssueCode::Required, "Missing required field"),
                ValidationIssue::warning(IssueCode::Value, "Deprecated code"),
            ],
        );

        assert!(!outcome.valid);
        assert!(outcome.has_errors());
        assert_eq!(outcome.error_count(), 1);
        assert_eq!(outcome.warning_count(), 1);

        let errors_only = outcome.without_warnings();
        assert_eq!(errors_only.issues.len(), 1);
    }

    #[test]
    fn operation_outcome_json() {
        let outcome = ValidationOutcome::new(
            Some("Patient".to_string()),
            vec![ValidationIssue::error(IssueCode::Required, "name is required")
                .at("Patient.name")
                .with_source("http://example.org/StructureDefinition/p")],
        );

        let op_outcome = outcome.to_operation_outcome();
        assert_eq!(op_outcome["resourceType"], "OperationOutcome");
        assert_eq!(op_outcome["issue"][0]["severity"], "error");
        assert_eq!(op_outcome["issue"][0]["code"], "required");
        assert_eq!(op_outcome["issue"][0]["expression"][0], "Patient.name");
        assert_eq!(op_outcome["issue"][0]["extension"][0]["url"], ISSUE_SOURCE_EXTENSION);
        assert_eq!(
            op_outcome["issue"][0]["extension"][0]["valueString"],
            "http://example.org/StructureDefinition/p"
        );
    }

    #[test]
    fn empty_outcome_is_all_ok() {
        let op_outcome = ValidationOutcome::success(None).to_operation_outcome();
        let issues = op_outcome["issue"].as_array().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["severity"], "information");
        assert_eq!(issues[0]["diagnostics"], "All OK");
    }

    #[test]
    fn duplicates_from_different_sources_collapse() {
        let a = ValidationIssue::error(IssueCode::Required, "missing").at("Patient.name");
        let issues = vec![
            a.clone().with_source("http://a"),
            a.clone().with_source("http://b"),
            ValidationIssue::warning(IssueCode::Required, "missing").at("Patient.name"),
        ];
        let unique = dedupe_issues(issues);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].source.as_deref(), Some("http://a"));
    }

    #[test]
    fn dedupe_keeps_first_occurrence_order() {
        let issue = |path: &str| ValidationIssue::error(IssueCode::Structure, "bad").at(path);
        let issues: Vec<_> = (0..500)
            .map(|i| issue(&format!("Patient.name[{}]", i % 3)))
            .collect();
        let unique = dedupe_issues(issues);
        let paths: Vec<_> = unique.iter().map(|i| i.location.as_deref().unwrap()).collect();
        assert_eq!(paths, vec!["Patient.name[0]", "Patient.name[1]", "Patient.name[2]"]);
    }
}
