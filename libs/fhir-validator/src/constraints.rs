//! Invariant evaluation.
//!
//! Constraint expressions are FHIRPath. The engine does not evaluate them
//! itself; it hands each one to a [`ConstraintEvaluator`].

use crate::outcome::{IssueCode, IssueSeverity, ValidationIssue};
use serde_json::Value;
use thiserror::Error;
use vigil_models::{ConstraintSeverity, ElementDefinitionConstraint};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EvaluationError(pub String);

impl EvaluationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub trait ConstraintEvaluator: Send + Sync {
    /// Evaluate `expression` with `focus` as `%this` inside `resource`.
    fn evaluate(
        &self,
        expression: &str,
        focus: &Value,
        resource: &Value,
    ) -> Result<bool, EvaluationError>;
}

impl<F> ConstraintEvaluator for F
where
    F: Fn(&str, &Value, &Value) -> Result<bool, EvaluationError> + Send + Sync,
{
    fn evaluate(
        &self,
        expression: &str,
        focus: &Value,
        resource: &Value,
    ) -> Result<bool, EvaluationError> {
        self(expression, focus, resource)
    }
}

/// Treats every constraint as satisfied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConstraintEvaluator;

impl ConstraintEvaluator for NoopConstraintEvaluator {
    fn evaluate(&self, _: &str, _: &Value, _: &Value) -> Result<bool, EvaluationError> {
        Ok(true)
    }
}

/// Issue for one constraint on one focus value, if it fails.
pub fn check_constraint(
    evaluator: &dyn ConstraintEvaluator,
    constraint: &ElementDefinitionConstraint,
    focus: &Value,
    resource: &Value,
) -> Option<ValidationIssue> {
    let expression = constraint.expression.as_deref()?;
    match evaluator.evaluate(expression, focus, resource) {
        Ok(true) => None,
        Ok(false) => {
            let severity = match constraint.severity {
                ConstraintSeverity::Error => IssueSeverity::Error,
                ConstraintSeverity::Warning => IssueSeverity::Warning,
            };
            Some(ValidationIssue::new(
                severity,
                IssueCode::Invariant,
                format!("Constraint failed: {}: {}", constraint.key, constraint.human),
            ))
        }
        Err(err) => Some(ValidationIssue::information(
            IssueCode::Processing,
            format!("Could not evaluate constraint {}: {}", constraint.key, err),
        )),
    }
}
