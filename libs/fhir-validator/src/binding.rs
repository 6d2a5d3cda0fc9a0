//! Binding checks for coded elements.

use crate::outcome::{IssueCode, ValidationIssue};
use crate::terminology::{check_with_timeout, Membership, TerminologyProvider};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use vigil_models::BindingStrength;

/// A code as it appears in an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedValue {
    pub system: Option<String>,
    pub code: String,
}

impl fmt::Display for CodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.system {
            Some(system) => write!(f, "{system}#{}", self.code),
            None => f.write_str(&self.code),
        }
    }
}

const QUANTITY_TYPES: &[&str] = &[
    "Quantity",
    "Age",
    "Count",
    "Distance",
    "Duration",
    "MoneyQuantity",
    "SimpleQuantity",
];

/// Whether values of `type_code` carry codes a binding applies to.
pub fn carries_codes(type_code: &str) -> bool {
    matches!(
        type_code,
        "code" | "string" | "uri" | "Coding" | "CodeableConcept"
    ) || QUANTITY_TYPES.contains(&type_code)
}

/// Codes carried by a value of the given type. Types that cannot carry a
/// code yield nothing.
pub fn coded_values(type_code: &str, value: &Value) -> Vec<CodedValue> {
    match type_code {
        "code" | "string" | "uri" => value
            .as_str()
            .map(|code| {
                vec![CodedValue {
                    system: None,
                    code: code.to_string(),
                }]
            })
            .unwrap_or_default(),
        "Coding" => coding(value).into_iter().collect(),
        "CodeableConcept" => value
            .get("coding")
            .and_then(Value::as_array)
            .map(|codings| codings.iter().filter_map(coding).collect())
            .unwrap_or_default(),
        t if QUANTITY_TYPES.contains(&t) => coding(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn coding(value: &Value) -> Option<CodedValue> {
    let code = value.get("code").and_then(Value::as_str)?;
    Some(CodedValue {
        system: value
            .get("system")
            .and_then(Value::as_str)
            .map(str::to_string),
        code: code.to_string(),
    })
}

/// A binding collected during the walk, checked once the walk is done.
#[derive(Debug, Clone)]
pub struct PendingBinding {
    pub path: String,
    pub value_set: String,
    pub strength: BindingStrength,
    pub codings: Vec<CodedValue>,
    /// Profile whose element declared the binding.
    pub source: Option<String>,
}

/// Check one bound value. Any member coding satisfies the binding.
pub async fn check_binding(
    provider: &dyn TerminologyProvider,
    timeout: Duration,
    binding: &PendingBinding,
) -> Option<ValidationIssue> {
    if binding.strength == BindingStrength::Example {
        return None;
    }

    let mut answers = Vec::with_capacity(binding.codings.len());
    for coded in &binding.codings {
        let answer = check_with_timeout(
            provider,
            timeout,
            &binding.value_set,
            coded.system.as_deref(),
            &coded.code,
        )
        .await;
        if answer.is_member() {
            return None;
        }
        answers.push(answer);
    }

    let issue = binding_issue(binding, &answers)?.at(binding.path.clone());
    Some(match &binding.source {
        Some(source) => issue.with_source(source.clone()),
        None => issue,
    })
}

/// Issue for a binding none of whose codings is a member. `answers` are in
/// coding order.
fn binding_issue(binding: &PendingBinding, answers: &[Membership]) -> Option<ValidationIssue> {
    let strength = binding.strength;
    let value_set = &binding.value_set;

    if binding.codings.is_empty() {
        return (strength == BindingStrength::Required).then(|| {
            ValidationIssue::error(
                IssueCode::CodeInvalid,
                format!("No code provided, and a code from the value set '{value_set}' is required"),
            )
        });
    }

    let codes = binding
        .codings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    if let Some(reason) = answers.iter().find_map(|a| match a {
        Membership::Unknown(reason) => Some(reason),
        _ => None,
    }) {
        let message = format!(
            "Unable to check code '{codes}' against the value set '{value_set}' ({} binding): {reason}",
            strength.as_str()
        );
        return Some(match strength {
            BindingStrength::Required | BindingStrength::Extensible => {
                ValidationIssue::warning(IssueCode::Processing, message)
            }
            _ => ValidationIssue::information(IssueCode::Processing, message),
        });
    }

    let system_in_value_set = answers.iter().any(|a| {
        matches!(
            a,
            Membership::NotMember {
                system_in_value_set: true
            }
        )
    });
    let message = format!(
        "The code '{codes}' is not in the value set '{value_set}' ({} binding)",
        strength.as_str()
    );
    Some(match strength {
        BindingStrength::Required => ValidationIssue::error(IssueCode::CodeInvalid, message),
        BindingStrength::Extensible if system_in_value_set => {
            ValidationIssue::warning(IssueCode::CodeInvalid, message)
        }
        _ => ValidationIssue::information(IssueCode::CodeInvalid, message),
    })
}
